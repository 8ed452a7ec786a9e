//! Runs every enabled processor one after another, in `priority_rank`
//! order, concatenating their output. Slower than `parallel` but useful
//! when processors share a scarce resource (one GPU, one model server).

use async_trait::async_trait;
use tracing::warn;

use crate::processor::RawDescription;
use crate::registry::ProcessorRegistry;

use super::ProcessingStrategy;

pub struct SequentialStrategy;

#[async_trait]
impl ProcessingStrategy for SequentialStrategy {
    async fn run(
        &self,
        registry: &ProcessorRegistry,
        chapter_id: &str,
        text: &str,
        _max_parallel_processors: usize,
    ) -> Vec<RawDescription> {
        let mut out = Vec::new();
        for (processor, _) in registry.enabled() {
            match processor.extract(chapter_id, text).await {
                Ok(descs) => out.extend(descs),
                Err(err) => {
                    warn!(chapter_id, processor = processor.name(), error = %err, "processor failed, continuing");
                }
            }
        }
        out
    }
}
