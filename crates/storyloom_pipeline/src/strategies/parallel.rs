//! Runs every enabled processor concurrently, bounded by
//! `max_parallel_processors`. Grounded on the worker-pool
//! `tokio::task::JoinSet` pattern used elsewhere in the retrieved pack for
//! bounded concurrent fan-out.

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::warn;

use crate::processor::RawDescription;
use crate::registry::ProcessorRegistry;

use super::ProcessingStrategy;

pub struct ParallelStrategy;

#[async_trait]
impl ProcessingStrategy for ParallelStrategy {
    async fn run(
        &self,
        registry: &ProcessorRegistry,
        chapter_id: &str,
        text: &str,
        max_parallel_processors: usize,
    ) -> Vec<RawDescription> {
        let processors = registry.enabled();
        let mut out = Vec::new();
        let mut iter = processors.into_iter();
        let mut join_set: JoinSet<(String, Result<Vec<RawDescription>, crate::processor::ProcessorError>)> =
            JoinSet::new();

        let bound = max_parallel_processors.max(1);

        loop {
            while join_set.len() < bound {
                let Some((processor, _)) = iter.next() else {
                    break;
                };
                let chapter_id = chapter_id.to_string();
                let text = text.to_string();
                join_set.spawn(async move {
                    let name = processor.name().to_string();
                    (name, processor.extract(&chapter_id, &text).await)
                });
            }

            let Some(result) = join_set.join_next().await else {
                break;
            };

            match result {
                Ok((name, Ok(descs))) => out.extend(descs),
                Ok((name, Err(err))) => {
                    warn!(chapter_id, processor = %name, error = %err, "processor failed in parallel run");
                }
                Err(join_err) => {
                    warn!(chapter_id, error = %join_err, "processor task panicked");
                }
            }
        }

        out
    }
}
