//! Egress to the image subsystem:
//! `request_image(description_id OR (chapter_id, description_text,
//! description_type), owner_id, priority) → deferred result`. The
//! orchestrator never calls an image API directly — it persists a pending
//! `GeneratedImage` row (at-least-once) and, if a sink is wired up,
//! notifies it; the row itself is the durable handoff.

use async_trait::async_trait;
use storyloom_db::models::Description;
use storyloom_db::{repo, DbError, DbPool};
use thiserror::Error;

/// Top-K descriptions per chapter get an image request once they clear
/// `priority_threshold`; K is a cap applied *after* the threshold filter,
/// not a replacement for it.
#[derive(Debug, Clone, Copy)]
pub struct ImageDispatchConfig {
    pub priority_threshold: f32,
    pub top_k: usize,
    pub service: &'static str,
}

impl Default for ImageDispatchConfig {
    fn default() -> Self {
        Self {
            priority_threshold: 0.65,
            top_k: 3,
            service: "pollinations",
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageDispatchError {
    #[error(transparent)]
    Db(#[from] DbError),
}

/// A single prompt-ready image generation request, handed to whatever
/// notifies the external image subsystem.
#[derive(Debug, Clone)]
pub struct ImageRequestNotice {
    pub idempotency_key: String,
    pub owner_id: String,
    pub description_id: String,
    pub chapter_id: String,
    pub prompt: String,
}

/// Side-channel notification hook. The durable handoff is the
/// `generated_images` row itself; a sink is an optional fast path (e.g. a
/// message bus publish) layered on top.
#[async_trait]
pub trait ImageRequestSink: Send + Sync {
    async fn notify(&self, request: &ImageRequestNotice);
}

/// Sink that does nothing beyond the DB write — correct default when
/// nothing downstream polls for pending rows in real time.
pub struct NullSink;

#[async_trait]
impl ImageRequestSink for NullSink {
    async fn notify(&self, _request: &ImageRequestNotice) {}
}

fn build_prompt(description: &Description) -> String {
    match &description.context {
        Some(context) if !context.is_empty() => format!("{} {}", description.content, context),
        _ => description.content.clone(),
    }
}

/// Picks the top-K descriptions above `priority_threshold` from one
/// chapter's freshly persisted batch and emits image requests for them.
pub async fn dispatch_chapter_images(
    pool: &DbPool,
    sink: &dyn ImageRequestSink,
    owner_id: &str,
    chapter_id: &str,
    descriptions: &[Description],
    config: ImageDispatchConfig,
) -> Result<usize, ImageDispatchError> {
    let mut candidates: Vec<&Description> = descriptions
        .iter()
        .filter(|d| d.is_suitable_for_generation && d.priority_score as f32 >= config.priority_threshold)
        .collect();
    candidates.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(config.top_k);

    for description in &candidates {
        let prompt = build_prompt(description);
        repo::upsert_pending_image_request(
            pool,
            &description.id,
            owner_id,
            Some(description.id.as_str()),
            Some(chapter_id),
            config.service,
            &prompt,
        )
        .await?;

        sink.notify(&ImageRequestNotice {
            idempotency_key: description.id.clone(),
            owner_id: owner_id.to_string(),
            description_id: description.id.clone(),
            chapter_id: chapter_id.to_string(),
            prompt,
        })
        .await;
    }

    Ok(candidates.len())
}
