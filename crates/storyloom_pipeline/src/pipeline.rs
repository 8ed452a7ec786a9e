//! Ties the description pipeline together end to end: strategy run, type
//! mapping, quality scoring, filtering, dedup, priority scoring,
//! persistence and image dispatch, one chapter at a time.

use std::sync::Arc;

use storyloom_db::models::{Chapter, Description, DescriptionType};
use storyloom_db::{repo, DbError, DbPool};
use storyloom_protocol::idempotency;
use thiserror::Error;

use crate::description_filter::{self, calculate_priority_score};
use crate::ensemble_voter;
use crate::image_dispatch::{self, ImageDispatchConfig, ImageRequestSink};
use crate::processor::RawDescription;
use crate::quality_scorer;
use crate::registry::ProcessorRegistry;
use crate::strategies::{ProcessingMode, ProcessingStrategy, StrategyFactory};
use crate::type_mapper;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    ImageDispatch(#[from] image_dispatch::ImageDispatchError),
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub processing_mode: ProcessingMode,
    pub max_parallel_processors: usize,
    pub quality_confidence_threshold: f32,
    pub image: ImageDispatchConfig,
    /// Whether a chapter flagged `is_service_page` is skipped entirely
    /// rather than processed at a lower threshold. Defaults to skipping.
    pub skip_service_pages: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            processing_mode: ProcessingMode::Adaptive,
            max_parallel_processors: 3,
            quality_confidence_threshold: 0.3,
            image: ImageDispatchConfig::default(),
            skip_service_pages: true,
        }
    }
}

/// One candidate carrying everything the common steps need, kept together
/// so filtering/dedup/priority scoring don't have to re-derive type or
/// quality from bare content.
struct Candidate {
    raw: RawDescription,
    description_type: DescriptionType,
    quality: f32,
}

pub struct DescriptionPipeline {
    registry: ProcessorRegistry,
    strategy_factory: StrategyFactory,
    sink: Arc<dyn ImageRequestSink>,
    config: PipelineConfig,
}

impl DescriptionPipeline {
    pub fn new(registry: ProcessorRegistry, consensus_threshold: f32, sink: Arc<dyn ImageRequestSink>, config: PipelineConfig) -> Self {
        Self {
            registry,
            strategy_factory: StrategyFactory::new(consensus_threshold),
            sink,
            config,
        }
    }

    pub fn registry_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.registry
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Processors configured on but currently failing `is_available`, for a
    /// job receipt's `unavailable_processors` field.
    pub fn unavailable_processors(&self) -> Vec<String> {
        self.registry.unavailable()
    }

    /// Processes one chapter end to end and returns the descriptions now
    /// persisted for it. Idempotent: a chapter already marked
    /// `is_description_parsed` is never re-run; its existing descriptions
    /// are returned unchanged.
    pub async fn process_chapter(
        &self,
        pool: &DbPool,
        owner_id: &str,
        chapter: &Chapter,
    ) -> Result<Vec<Description>, PipelineError> {
        if chapter.is_description_parsed {
            return Ok(repo::descriptions_for_chapter(pool, &chapter.id).await?);
        }

        if chapter.is_service_page && self.config.skip_service_pages {
            return Ok(Vec::new());
        }

        let strategy = self.strategy_factory.get(self.config.processing_mode);
        let raw = strategy
            .run(
                &self.registry,
                &chapter.id,
                &chapter.content,
                self.config.max_parallel_processors,
            )
            .await;

        // 1. Type mapping, 2. quality scoring.
        let candidates: Vec<Candidate> = raw
            .into_iter()
            .map(|raw| {
                let description_type = type_mapper::map_entity_to_description_type(&raw.label, &raw.content);
                let quality = quality_scorer::score(&raw.content);
                Candidate { raw, description_type, quality }
            })
            .collect();

        // 3. Filtering (length/word-count/confidence).
        let filtered = filter_candidates(candidates, self.config.quality_confidence_threshold);

        // 4. Deduplication.
        let deduped = description_filter::deduplicate_by(
            filtered,
            |c| c.raw.content.as_str(),
            |c| c.raw.confidence,
        );

        // 5. Priority scoring, then persistence-ready rows.
        let mode_name = format!("{:?}", self.config.processing_mode).to_lowercase();
        let descriptions: Vec<Description> = deduped
            .into_iter()
            .enumerate()
            .map(|(position, candidate)| {
                let base_priority = calculate_priority_score(
                    candidate.description_type,
                    candidate.raw.confidence,
                    candidate.quality,
                );
                // Ensemble clusters of >1 agreeing processor get a priority
                // boost proportional to agreement;
                // single-processor output leaves `n_sources == 1`, a no-op.
                let priority =
                    (base_priority * ensemble_voter::priority_boost(candidate.raw.n_sources)).clamp(0.0, 1.0);
                let id = idempotency::description_key(&chapter.id, &candidate.raw.content, &mode_name);
                let word_count = candidate.raw.content.split_whitespace().count() as i64;
                Description {
                    id,
                    chapter_id: chapter.id.clone(),
                    description_type: candidate.description_type,
                    content: candidate.raw.content,
                    context: candidate.raw.context,
                    confidence_score: candidate.raw.confidence as f64,
                    priority_score: priority as f64,
                    position: position as i64,
                    word_count,
                    is_suitable_for_generation: priority >= self.config.image.priority_threshold,
                    image_generated: false,
                    created_at: chrono::Utc::now(),
                }
            })
            .collect();

        // 6. Persistence.
        repo::checkpoint_chapter(pool, &chapter.id, &descriptions).await?;

        // 7. Image dispatch.
        image_dispatch::dispatch_chapter_images(
            pool,
            self.sink.as_ref(),
            owner_id,
            &chapter.id,
            &descriptions,
            self.config.image,
        )
        .await?;

        Ok(descriptions)
    }
}

fn filter_candidates(candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| {
            let content = c.raw.content.trim();
            let words = content.split_whitespace().count();
            content.len() >= description_filter::MIN_CONTENT_LENGTH
                && content.len() <= description_filter::MAX_CONTENT_LENGTH
                && words >= description_filter::MIN_WORD_COUNT
                && c.raw.confidence >= threshold
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ProcessorError;
    use async_trait::async_trait;
    use storyloom_db::models::{BookFormat, Genre};
    use storyloom_db::pool::{create_pool, DbConfig};

    struct StubProcessor;

    #[async_trait]
    impl crate::processor::Processor for StubProcessor {
        fn name(&self) -> &str {
            "stub"
        }
        fn is_available(&self) -> bool {
            true
        }
        async fn load(&self) -> Result<(), ProcessorError> {
            Ok(())
        }
        async fn extract(&self, _chapter_id: &str, _text: &str) -> Result<Vec<RawDescription>, ProcessorError> {
            Ok(vec![RawDescription::single(
                "LOCATION",
                "the crumbling tower overlooked the fog-bound valley at dawn",
                0.9,
                0,
            )])
        }
    }

    #[tokio::test]
    async fn processes_chapter_and_persists_descriptions() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        repo::insert_book_with_chapters(
            &pool,
            "book-1",
            "user-1",
            "Test Book",
            BookFormat::Epub,
            Genre::Fantasy,
            &[(1, None, "ignored, extraction is stubbed".to_string())],
        )
        .await
        .unwrap();
        let chapter = &repo::chapters_for_book(&pool, "book-1").await.unwrap()[0];

        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(StubProcessor), None);

        let pipeline = DescriptionPipeline::new(
            registry,
            0.5,
            Arc::new(image_dispatch::NullSink),
            PipelineConfig {
                processing_mode: ProcessingMode::Single,
                ..Default::default()
            },
        );

        let descriptions = pipeline.process_chapter(&pool, "user-1", chapter).await.unwrap();
        assert_eq!(descriptions.len(), 1);

        let reloaded = repo::chapters_for_book(&pool, "book-1").await.unwrap();
        assert!(reloaded[0].is_description_parsed);
    }

    #[tokio::test]
    async fn already_parsed_chapter_is_not_reprocessed() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        repo::insert_book_with_chapters(
            &pool,
            "book-1",
            "user-1",
            "Test Book",
            BookFormat::Epub,
            Genre::Fantasy,
            &[(1, None, "content".to_string())],
        )
        .await
        .unwrap();
        let mut chapter = repo::chapters_for_book(&pool, "book-1").await.unwrap().remove(0);
        chapter.is_description_parsed = true;

        let registry = ProcessorRegistry::new();
        let pipeline = DescriptionPipeline::new(
            registry,
            0.5,
            Arc::new(image_dispatch::NullSink),
            PipelineConfig::default(),
        );

        let descriptions = pipeline.process_chapter(&pool, "user-1", &chapter).await.unwrap();
        assert!(descriptions.is_empty());
    }
}
