//! The NLP processor contract: processors are opaque, pluggable extractors.
//! This crate never assumes a concrete model; callers register whatever
//! implements [`Processor`] (a local model, a subprocess shim, a remote
//! inference service).

use async_trait::async_trait;
use thiserror::Error;

/// One candidate description surfaced by a processor, before type mapping,
/// quality scoring, filtering or dedup.
#[derive(Debug, Clone)]
pub struct RawDescription {
    pub label: String,
    pub content: String,
    pub context: Option<String>,
    pub confidence: f32,
    pub position: usize,
    /// Number of processors whose output agreed on this description.
    /// Always `1` for processor output; the ensemble voter
    /// sets it to the size of the consensus cluster it merged, so
    /// `pipeline.rs` can apply the agreement priority boost uniformly
    /// across strategies without special-casing ensemble mode.
    pub n_sources: usize,
}

impl RawDescription {
    /// A raw description as a single processor emits it, before any
    /// ensemble merging.
    pub fn single(label: impl Into<String>, content: impl Into<String>, confidence: f32, position: usize) -> Self {
        Self {
            label: label.into(),
            content: content.into(),
            context: None,
            confidence,
            position,
            n_sources: 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor {0} unavailable: {1}")]
    Unavailable(String, String),

    #[error("processor {0} failed: {1}")]
    Failed(String, String),
}

impl ProcessorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessorError::Unavailable(_, _))
    }
}

/// A pluggable description extractor. Implementations own their own model
/// lifecycle; `load` is called once by the registry before first use, and
/// `extract` may be called concurrently across chapters.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap check used by the admission/pre-task hook to skip processors
    /// that are known down without paying for a failed `extract`.
    fn is_available(&self) -> bool;

    async fn load(&self) -> Result<(), ProcessorError>;

    async fn extract(
        &self,
        chapter_id: &str,
        text: &str,
    ) -> Result<Vec<RawDescription>, ProcessorError>;
}
