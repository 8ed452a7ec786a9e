//! Parallel execution of every enabled processor, followed by weighted
//! consensus voting across their results.

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::warn;

use crate::ensemble_voter::{self, ProcessorVote};
use crate::processor::{ProcessorError, RawDescription};
use crate::registry::ProcessorRegistry;

use super::ProcessingStrategy;

pub struct EnsembleStrategy {
    consensus_threshold: f32,
}

impl EnsembleStrategy {
    pub fn new(consensus_threshold: f32) -> Self {
        Self { consensus_threshold }
    }
}

#[async_trait]
impl ProcessingStrategy for EnsembleStrategy {
    async fn run(
        &self,
        registry: &ProcessorRegistry,
        chapter_id: &str,
        text: &str,
        max_parallel_processors: usize,
    ) -> Vec<RawDescription> {
        let processors = registry.enabled();
        let bound = max_parallel_processors.max(1);
        let mut iter = processors.into_iter();

        type Outcome = (String, f32, u8, Result<Vec<RawDescription>, ProcessorError>);
        let mut join_set: JoinSet<Outcome> = JoinSet::new();
        let mut votes: Vec<ProcessorVote> = Vec::new();

        loop {
            while join_set.len() < bound {
                let Some((processor, config)) = iter.next() else {
                    break;
                };
                let chapter_id = chapter_id.to_string();
                let text = text.to_string();
                let weight = config.weight;
                let priority_rank = config.priority_rank;
                join_set.spawn(async move {
                    let name = processor.name().to_string();
                    (name, weight, priority_rank, processor.extract(&chapter_id, &text).await)
                });
            }

            let Some(result) = join_set.join_next().await else {
                break;
            };

            match result {
                Ok((name, weight, priority_rank, Ok(descs))) => {
                    for description in descs {
                        votes.push(ProcessorVote {
                            description,
                            weight,
                            processor_name: name.clone(),
                            priority_rank,
                        });
                    }
                }
                Ok((name, _, _, Err(err))) => {
                    warn!(chapter_id, processor = %name, error = %err, "processor failed in ensemble run");
                }
                Err(join_err) => {
                    warn!(chapter_id, error = %join_err, "processor task panicked in ensemble run");
                }
            }
        }

        ensemble_voter::vote(votes, self.consensus_threshold)
    }
}
