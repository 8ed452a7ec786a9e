//! Inspects chapter text and picks `Single`, `Parallel` or `Ensemble` based
//! on a complexity score combining word length, vocabulary diversity,
//! sentence density, capitalized-token presence and dialogue markers.

use async_trait::async_trait;

use crate::processor::RawDescription;
use crate::registry::ProcessorRegistry;

use super::ensemble::EnsembleStrategy;
use super::parallel::ParallelStrategy;
use super::single::SingleStrategy;
use super::ProcessingStrategy;

const SIMPLE_CEILING: f32 = 0.35;
const COMPLEX_FLOOR: f32 = 0.65;

const DIALOGUE_MARKERS: &[&str] = &["said", "asked", "replied", "whispered", "shouted", "\""];

/// Complexity in `[0, 1]` from five equal-weighted factors: average word
/// length, vocabulary diversity, sentence density, capitalized-token
/// ratio, and whether the passage reads as dialogue.
pub fn complexity_score(text: &str) -> f32 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let num_words = words.len() as f32;

    let avg_word_len = words.iter().map(|w| w.len()).sum::<usize>() as f32 / num_words;
    let word_len_score = (avg_word_len / 10.0).min(1.0);

    let unique: std::collections::HashSet<String> =
        words.iter().map(|w| w.to_lowercase()).collect();
    let diversity = unique.len() as f32 / num_words;

    let sentence_markers = text.matches(['.', '!', '?']).count() as f32;
    let sentence_density = (sentence_markers / num_words * 10.0).min(1.0);

    let capitalized = words
        .iter()
        .skip(1)
        .filter(|w| w.chars().next().is_some_and(|c| c.is_uppercase()))
        .count() as f32;
    let capitalized_ratio = (capitalized / num_words * 5.0).min(1.0);

    let lower = text.to_lowercase();
    let is_dialogue = if DIALOGUE_MARKERS.iter().any(|m| lower.contains(m)) {
        1.0
    } else {
        0.0
    };

    (word_len_score + diversity + sentence_density + capitalized_ratio + is_dialogue) / 5.0
}

pub struct AdaptiveStrategy {
    single: SingleStrategy,
    parallel: ParallelStrategy,
    ensemble: EnsembleStrategy,
}

impl AdaptiveStrategy {
    pub fn new(consensus_threshold: f32) -> Self {
        Self {
            single: SingleStrategy,
            parallel: ParallelStrategy,
            ensemble: EnsembleStrategy::new(consensus_threshold),
        }
    }
}

#[async_trait]
impl ProcessingStrategy for AdaptiveStrategy {
    async fn run(
        &self,
        registry: &ProcessorRegistry,
        chapter_id: &str,
        text: &str,
        max_parallel_processors: usize,
    ) -> Vec<RawDescription> {
        let complexity = complexity_score(text);
        if complexity < SIMPLE_CEILING {
            self.single.run(registry, chapter_id, text, max_parallel_processors).await
        } else if complexity <= COMPLEX_FLOOR {
            self.parallel.run(registry, chapter_id, text, max_parallel_processors).await
        } else {
            self.ensemble.run(registry, chapter_id, text, max_parallel_processors).await
        }
    }
}
