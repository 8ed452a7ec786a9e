//! The Description Pipeline: pluggable NLP processors,
//! strategy selection, and the post-strategy common steps (type mapping,
//! quality scoring, filtering, dedup, priority scoring, persistence and
//! image dispatch) that turn one chapter's raw text into persisted,
//! prioritized descriptions.

pub mod config_loader;
pub mod description_filter;
pub mod ensemble_voter;
pub mod image_dispatch;
pub mod model_cache;
pub mod pipeline;
pub mod processor;
pub mod quality_scorer;
pub mod registry;
pub mod strategies;
pub mod type_mapper;

pub use model_cache::ModelCache;
pub use pipeline::{DescriptionPipeline, PipelineConfig, PipelineError};
pub use processor::{Processor, ProcessorError, RawDescription};
pub use registry::{ProcessorConfig, ProcessorRegistry};
pub use strategies::{ProcessingMode, ProcessingStrategy, StrategyFactory};
