//! Schema migration.
//!
//! A single idempotent DDL script run at pool creation, `CREATE TABLE IF NOT
//! EXISTS` throughout so repeated startups against an existing database are
//! cheap no-ops. A real deployment would hand schema evolution to a
//! migration tool; here the orchestrator owns its own tables end to end.

use crate::{DbError, DbPool};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS books (
    id              TEXT PRIMARY KEY,
    owner_id        TEXT NOT NULL,
    title           TEXT NOT NULL,
    format          TEXT NOT NULL CHECK (format IN ('epub', 'fb2')),
    genre           TEXT NOT NULL,
    is_parsed       INTEGER NOT NULL DEFAULT 0,
    is_processing   INTEGER NOT NULL DEFAULT 0,
    cover_ref       TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chapters (
    id                      TEXT PRIMARY KEY,
    book_id                 TEXT NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    chapter_number          INTEGER NOT NULL,
    title                   TEXT,
    content                 TEXT NOT NULL,
    word_count              INTEGER NOT NULL DEFAULT 0,
    is_description_parsed   INTEGER NOT NULL DEFAULT 0,
    descriptions_found      INTEGER NOT NULL DEFAULT 0,
    is_service_page         INTEGER NOT NULL DEFAULT 0,
    UNIQUE (book_id, chapter_number)
);

CREATE TABLE IF NOT EXISTS descriptions (
    id                          TEXT PRIMARY KEY,
    chapter_id                  TEXT NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
    description_type            TEXT NOT NULL CHECK (
        description_type IN ('LOCATION', 'CHARACTER', 'ATMOSPHERE', 'OBJECT', 'ACTION')
    ),
    content                     TEXT NOT NULL,
    context                     TEXT,
    confidence_score            REAL NOT NULL CHECK (confidence_score >= 0.0 AND confidence_score <= 1.0),
    priority_score               REAL NOT NULL CHECK (priority_score >= 0.0 AND priority_score <= 1.0),
    position                    INTEGER NOT NULL,
    word_count                  INTEGER NOT NULL,
    is_suitable_for_generation  INTEGER NOT NULL DEFAULT 0,
    image_generated             INTEGER NOT NULL DEFAULT 0,
    created_at                  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_descriptions_chapter ON descriptions(chapter_id);
CREATE INDEX IF NOT EXISTS idx_descriptions_priority ON descriptions(priority_score DESC);

CREATE TABLE IF NOT EXISTS generated_images (
    id              TEXT PRIMARY KEY,
    owner_id        TEXT NOT NULL,
    description_id  TEXT REFERENCES descriptions(id) ON DELETE CASCADE,
    chapter_id      TEXT REFERENCES chapters(id) ON DELETE CASCADE,
    service_used    TEXT NOT NULL,
    status          TEXT NOT NULL CHECK (
        status IN ('pending', 'generating', 'completed', 'failed', 'moderated')
    ),
    location        TEXT,
    prompt          TEXT NOT NULL,
    requested_at    TEXT NOT NULL,
    completed_at    TEXT,
    CHECK (description_id IS NOT NULL OR chapter_id IS NOT NULL)
);

CREATE TABLE IF NOT EXISTS parsing_jobs (
    id           TEXT PRIMARY KEY,
    book_id      TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    state        TEXT NOT NULL CHECK (
        state IN ('queued', 'running', 'succeeded', 'failed', 'cancelled')
    ),
    priority     INTEGER NOT NULL CHECK (priority BETWEEN 1 AND 10),
    attempts     INTEGER NOT NULL DEFAULT 0,
    queued_at    TEXT NOT NULL,
    started_at   TEXT,
    finished_at  TEXT,
    last_error   TEXT
);

-- At most one non-terminal job per book.
CREATE UNIQUE INDEX IF NOT EXISTS idx_parsing_jobs_one_active_per_book
    ON parsing_jobs(book_id)
    WHERE state IN ('queued', 'running');

CREATE INDEX IF NOT EXISTS idx_parsing_jobs_state_priority
    ON parsing_jobs(state, priority, queued_at);

CREATE INDEX IF NOT EXISTS idx_parsing_jobs_user ON parsing_jobs(user_id, state);

-- Per-processor tuning for storyloom_pipeline's registry.
CREATE TABLE IF NOT EXISTS processor_configs (
    name            TEXT PRIMARY KEY,
    enabled         INTEGER NOT NULL DEFAULT 1,
    weight          REAL NOT NULL DEFAULT 1.0,
    threshold       REAL NOT NULL DEFAULT 0.3,
    priority_rank   INTEGER NOT NULL DEFAULT 0
);
"#;

/// Run the full schema script. Safe to call on every pool creation.
pub async fn migrate(pool: &DbPool) -> Result<(), DbError> {
    for statement in SCHEMA_SQL.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = crate::pool::create_pool(DbConfig::sqlite_memory())
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn one_active_job_per_book_is_enforced() {
        let pool = crate::pool::create_pool(DbConfig::sqlite_memory())
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO parsing_jobs (id, book_id, user_id, state, priority, attempts, queued_at)
             VALUES ('job-1', 'book-1', 'user-1', 'queued', 5, 0, '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let second = sqlx::query(
            "INSERT INTO parsing_jobs (id, book_id, user_id, state, priority, attempts, queued_at)
             VALUES ('job-2', 'book-1', 'user-2', 'queued', 5, 0, '2026-01-01T00:00:01Z')",
        )
        .execute(&pool)
        .await;

        assert!(second.is_err());
    }
}
