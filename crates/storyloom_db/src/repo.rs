//! Repository functions for books, chapters, descriptions and generated
//! images. The admission/coordination crate talks to
//! `parsing_jobs` directly via `storyloom_coordination::db::JobQueue`; this
//! module owns everything the worker and pipeline touch while executing a
//! job, plus the `submit_book` ingress write.

use chrono::Utc;
use sqlx::Row;

use crate::models::{Book, BookFormat, Chapter, Description, Genre, GeneratedImage, ImageStatus};
use crate::{DbError, DbPool};

/// Ingress write: register a newly uploaded book and its chapters in one
/// transaction, backing `submit_book`'s ingress write. Chapter content has already been
/// extracted by the format parser (EPUB/FB2) before this call; this crate
/// only persists the result.
pub async fn insert_book_with_chapters(
    pool: &DbPool,
    book_id: &str,
    owner_id: &str,
    title: &str,
    format: BookFormat,
    genre: Genre,
    chapters: &[(i64, Option<String>, String)],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO books (id, owner_id, title, format, genre, is_parsed, is_processing, cover_ref, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 0, 0, NULL, ?, ?)
        "#,
    )
    .bind(book_id)
    .bind(owner_id)
    .bind(title)
    .bind(format)
    .bind(genre)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (chapter_number, chapter_title, content) in chapters {
        let word_count = content.split_whitespace().count() as i64;
        let chapter_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO chapters (id, book_id, chapter_number, title, content, word_count,
                                   is_description_parsed, descriptions_found, is_service_page)
            VALUES (?, ?, ?, ?, ?, ?, 0, 0, 0)
            "#,
        )
        .bind(&chapter_id)
        .bind(book_id)
        .bind(chapter_number)
        .bind(chapter_title)
        .bind(content)
        .bind(word_count)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn get_book(pool: &DbPool, book_id: &str) -> Result<Book, DbError> {
    sqlx::query_as("SELECT * FROM books WHERE id = ?")
        .bind(book_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("book {book_id}")))
}

/// Toggle the `is_processing` flag around a job's execution.
pub async fn set_book_processing(pool: &DbPool, book_id: &str, processing: bool) -> Result<(), DbError> {
    sqlx::query("UPDATE books SET is_processing = ?, updated_at = ? WHERE id = ?")
        .bind(processing)
        .bind(Utc::now())
        .bind(book_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a book fully parsed (worker lifecycle step 6).
pub async fn set_book_parsed(pool: &DbPool, book_id: &str) -> Result<(), DbError> {
    sqlx::query("UPDATE books SET is_parsed = 1, is_processing = 0, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(book_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Chapters for a book in ascending `chapter_number` order: chapters are
/// processed and persisted in that order.
pub async fn chapters_for_book(pool: &DbPool, book_id: &str) -> Result<Vec<Chapter>, DbError> {
    let chapters = sqlx::query_as(
        "SELECT * FROM chapters WHERE book_id = ? ORDER BY chapter_number ASC",
    )
    .bind(book_id)
    .fetch_all(pool)
    .await?;
    Ok(chapters)
}

/// A single chapter checkpoint: persist every extracted description for the
/// chapter and flip its parsed flags, all in one transaction. At-most-once
/// per chapter: re-running against an
/// already-parsed chapter is a no-op handled by the caller checking
/// `is_description_parsed` before invoking the pipeline at all.
pub async fn checkpoint_chapter(
    pool: &DbPool,
    chapter_id: &str,
    descriptions: &[Description],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    for d in descriptions {
        sqlx::query(
            r#"
            INSERT INTO descriptions (id, chapter_id, description_type, content, context,
                                       confidence_score, priority_score, position, word_count,
                                       is_suitable_for_generation, image_generated, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&d.id)
        .bind(&d.chapter_id)
        .bind(d.description_type)
        .bind(&d.content)
        .bind(&d.context)
        .bind(d.confidence_score)
        .bind(d.priority_score)
        .bind(d.position)
        .bind(d.word_count)
        .bind(d.is_suitable_for_generation)
        .bind(d.image_generated)
        .bind(d.created_at)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE chapters
        SET is_description_parsed = 1, descriptions_found = descriptions_found + ?
        WHERE id = ?
        "#,
    )
    .bind(descriptions.len() as i64)
    .bind(chapter_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Descriptions already persisted for a chapter — used to make reprocessing
/// a chapter idempotent ("processing a chapter twice leaves
/// descriptions unchanged").
pub async fn descriptions_for_chapter(pool: &DbPool, chapter_id: &str) -> Result<Vec<Description>, DbError> {
    let rows = sqlx::query_as(
        "SELECT * FROM descriptions WHERE chapter_id = ? ORDER BY position ASC",
    )
    .bind(chapter_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Insert a pending `GeneratedImage` row representing an at-least-once
/// image-generation request. `idempotency_key` is
/// stored as the row id so a duplicate request is a harmless upsert.
pub async fn upsert_pending_image_request(
    pool: &DbPool,
    idempotency_key: &str,
    owner_id: &str,
    description_id: Option<&str>,
    chapter_id: Option<&str>,
    service_used: &str,
    prompt: &str,
) -> Result<(), DbError> {
    if description_id.is_none() && chapter_id.is_none() {
        return Err(DbError::invalid_state(
            "generated_images requires a description_id or chapter_id",
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO generated_images (id, owner_id, description_id, chapter_id, service_used,
                                       status, location, prompt, requested_at, completed_at)
        VALUES (?, ?, ?, ?, ?, 'pending', NULL, ?, ?, NULL)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(idempotency_key)
    .bind(owner_id)
    .bind(description_id)
    .bind(chapter_id)
    .bind(service_used)
    .bind(prompt)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    if let Some(description_id) = description_id {
        sqlx::query("UPDATE descriptions SET image_generated = 1 WHERE id = ?")
            .bind(description_id)
            .execute(pool)
            .await?;
    }

    Ok(())
}

pub async fn image_status(pool: &DbPool, image_id: &str) -> Result<ImageStatus, DbError> {
    let row = sqlx::query("SELECT status FROM generated_images WHERE id = ?")
        .bind(image_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::not_found(format!("generated image {image_id}")))?;
    let raw: String = row.get("status");
    match raw.as_str() {
        "pending" => Ok(ImageStatus::Pending),
        "generating" => Ok(ImageStatus::Generating),
        "completed" => Ok(ImageStatus::Completed),
        "failed" => Ok(ImageStatus::Failed),
        "moderated" => Ok(ImageStatus::Moderated),
        other => Err(DbError::invalid_state(format!("unknown image status {other}"))),
    }
}
