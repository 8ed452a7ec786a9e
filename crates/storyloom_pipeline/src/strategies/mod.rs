//! Processing strategies: how the set of enabled processors
//! is run against one chapter's text. Mirrors the original system's
//! `ProcessingStrategy`/`StrategyFactory`/`ProcessingMode` shape.

mod adaptive;
mod ensemble;
mod factory;
mod parallel;
mod sequential;
mod single;

pub use adaptive::AdaptiveStrategy;
pub use ensemble::EnsembleStrategy;
pub use factory::StrategyFactory;
pub use parallel::ParallelStrategy;
pub use sequential::SequentialStrategy;
pub use single::SingleStrategy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::processor::RawDescription;
use crate::registry::ProcessorRegistry;

/// Selects which strategy runs a given chapter (`processing_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Single,
    Parallel,
    Sequential,
    Ensemble,
    Adaptive,
}

impl std::str::FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            "ensemble" => Ok(Self::Ensemble),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(format!("unknown processing mode: {other}")),
        }
    }
}

/// A strategy turns one chapter's text into a flat list of raw descriptions
/// by running some subset/ordering of the registry's enabled processors.
#[async_trait]
pub trait ProcessingStrategy: Send + Sync {
    async fn run(
        &self,
        registry: &ProcessorRegistry,
        chapter_id: &str,
        text: &str,
        max_parallel_processors: usize,
    ) -> Vec<RawDescription>;
}
