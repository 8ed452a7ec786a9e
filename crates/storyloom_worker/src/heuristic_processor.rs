//! A dependency-free default [`Processor`]: splits chapter
//! text into sentence-like spans and scores each by the same keyword
//! vocabulary `storyloom_pipeline::type_mapper` uses for its own fallback
//! sniffing. Registered by default so `storyloom worker` produces output
//! end to end without an operator having to stand up an external NLP
//! service first; a real model is registered alongside it (or in place of
//! it) the same way any other `Processor` is.

use async_trait::async_trait;

use storyloom_pipeline::{Processor, ProcessorError, RawDescription};

const KEYWORDS: &[&str] = &[
    "room", "hall", "street", "forest", "castle", "city", "house", "he", "she", "they", "man",
    "woman", "child", "face", "eyes", "silence", "tension", "smell", "cold", "warmth", "fear",
    "sword", "book", "table", "door", "ring", "letter",
];

const MIN_WORDS: usize = 6;

/// Splits on sentence punctuation and scores each candidate by keyword
/// density, labeling everything `MISC` so downstream type mapping
/// (`type_mapper::determine_type_by_keywords`) decides the description
/// type from content rather than a label this processor can't supply.
pub struct HeuristicProcessor;

#[async_trait]
impl Processor for HeuristicProcessor {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn load(&self) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn extract(&self, _chapter_id: &str, text: &str) -> Result<Vec<RawDescription>, ProcessorError> {
        let mut out = Vec::new();
        for (position, sentence) in text.split(['.', '!', '?']).enumerate() {
            let trimmed = sentence.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.split_whitespace().count() < MIN_WORDS {
                continue;
            }
            let lower = trimmed.to_lowercase();
            let hits = KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
            let confidence = (0.3 + 0.1 * hits as f32).min(0.95);
            out.push(RawDescription::single("MISC", trimmed, confidence, position));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_sentences_meeting_the_word_floor() {
        let processor = HeuristicProcessor;
        let text = "The old castle stood silent on the hill. Yes. He walked through the dim hall, fear in his eyes.";
        let found = processor.extract("chapter-1", text).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.label == "MISC"));
    }

    #[tokio::test]
    async fn higher_keyword_density_scores_higher_confidence() {
        let processor = HeuristicProcessor;
        let plain = processor
            .extract("c", "A quiet afternoon passed without anything of note happening today.")
            .await
            .unwrap();
        let dense = processor
            .extract("c", "She stood in the hall by the door, fear and cold silence in her eyes.")
            .await
            .unwrap();
        assert!(dense[0].confidence > plain[0].confidence);
    }
}
