//! Runs only the highest-priority enabled processor. Cheapest strategy,
//! used when a single trusted model is enough.

use async_trait::async_trait;
use tracing::warn;

use crate::processor::RawDescription;
use crate::registry::ProcessorRegistry;

use super::ProcessingStrategy;

pub struct SingleStrategy;

#[async_trait]
impl ProcessingStrategy for SingleStrategy {
    async fn run(
        &self,
        registry: &ProcessorRegistry,
        chapter_id: &str,
        text: &str,
        _max_parallel_processors: usize,
    ) -> Vec<RawDescription> {
        let Some((processor, _)) = registry.enabled().into_iter().next() else {
            warn!(chapter_id, "single strategy: no enabled processor");
            return vec![];
        };

        match processor.extract(chapter_id, text).await {
            Ok(descs) => descs,
            Err(err) => {
                warn!(chapter_id, processor = processor.name(), error = %err, "processor failed");
                vec![]
            }
        }
    }
}
