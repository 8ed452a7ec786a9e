//! Filtering, deduplication and priority scoring applied after a strategy
//! produces its raw descriptions.

use std::collections::HashSet;

use storyloom_db::models::DescriptionType;

use crate::processor::RawDescription;

/// Floor below which a description is never suitable for image generation:
/// content shorter than this is rejected outright.
pub const MIN_CONTENT_LENGTH: usize = 50;

/// Ceiling above which a description is considered a parsing artifact
/// rather than a single vivid passage.
pub const MAX_CONTENT_LENGTH: usize = 1000;

/// Minimum word count for a description to be generation-worthy.
pub const MIN_WORD_COUNT: usize = 10;

/// Character trigrams of a string, lowercased, whitespace-collapsed.
fn trigrams(s: &str) -> HashSet<String> {
    let normalized: String = s.chars().flat_map(|c| c.to_lowercase()).collect();
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < 3 {
        return HashSet::from([normalized]);
    }
    chars
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Jaccard similarity over character trigrams, in `[0, 1]`.
pub fn trigram_similarity(a: &str, b: &str) -> f32 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Threshold above which two descriptions are considered duplicates.
const DUPLICATE_SIMILARITY: f32 = 0.8;

/// Clusters near-duplicate descriptions (by trigram Jaccard similarity of
/// content) and keeps the highest-confidence member of each cluster.
pub fn deduplicate_descriptions(descriptions: Vec<RawDescription>) -> Vec<RawDescription> {
    deduplicate_by(descriptions, |d| d.content.as_str(), |d| d.confidence)
}

/// Generalized dedup for any item carrying text content and a confidence
/// score, so `pipeline.rs` can dedup type-mapped/quality-scored candidates
/// without unpacking them back to bare [`RawDescription`]s first. On an
/// exact tie in confidence, the earliest-seen item wins.
pub fn deduplicate_by<T>(
    items: Vec<T>,
    content_of: impl Fn(&T) -> &str,
    confidence_of: impl Fn(&T) -> f32,
) -> Vec<T> {
    let mut kept: Vec<T> = Vec::new();

    'outer: for candidate in items {
        for existing in kept.iter_mut() {
            if trigram_similarity(content_of(&candidate), content_of(existing)) >= DUPLICATE_SIMILARITY
            {
                if confidence_of(&candidate) > confidence_of(existing) {
                    *existing = candidate;
                }
                continue 'outer;
            }
        }
        kept.push(candidate);
    }

    kept
}

/// Combines confidence, description-type weight and a literary-quality
/// boost into the `[0, 1]` priority score persisted on
/// `descriptions.priority_score`:
/// `priority = base_confidence × type_weight × literary_boost`, where
/// `literary_boost` is `1.1` when the quality score
/// (see [`crate::quality_scorer`]) is at least `0.7`, else `1.0`.
pub fn calculate_priority_score(
    description_type: DescriptionType,
    confidence: f32,
    quality_score: f32,
) -> f32 {
    let type_weight = match description_type {
        DescriptionType::Location => 1.0,
        DescriptionType::Character => 0.95,
        DescriptionType::Atmosphere => 0.8,
        DescriptionType::Object => 0.7,
        DescriptionType::Action => 0.6,
    };

    let literary_boost = if quality_score >= 0.7 { 1.1 } else { 1.0 };
    (confidence * type_weight * literary_boost).clamp(0.0, 1.0)
}

/// Drops descriptions failing any quality gate: content length outside
/// `[50, 1000]` chars, fewer than 10 words, or confidence below the
/// processor's configured threshold.
pub fn filter_by_quality_threshold(
    descriptions: Vec<RawDescription>,
    threshold: f32,
) -> Vec<RawDescription> {
    descriptions
        .into_iter()
        .filter(|d| {
            let len = d.content.trim().len();
            let words = d.content.split_whitespace().count();
            len >= MIN_CONTENT_LENGTH
                && len <= MAX_CONTENT_LENGTH
                && words >= MIN_WORD_COUNT
                && d.confidence >= threshold
        })
        .collect()
}

/// Full post-strategy pipeline for one chapter's raw descriptions: quality
/// filter, then dedup. Type mapping and priority scoring happen in
/// `pipeline.rs` once each candidate has a [`DescriptionType`].
pub fn filter_and_prioritize_descriptions(
    descriptions: Vec<RawDescription>,
    threshold: f32,
) -> Vec<RawDescription> {
    let filtered = filter_by_quality_threshold(descriptions, threshold);
    deduplicate_descriptions(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(content: &str, confidence: f32) -> RawDescription {
        RawDescription::single("location", content, confidence, 0)
    }

    #[test]
    fn exactly_fifty_chars_is_accepted() {
        // 10 words, 50 chars total.
        let content = "abcde abcd abcd abcd abcd abcd abcd abcd abcd abcd";
        assert_eq!(content.len(), 50);
        let out = filter_by_quality_threshold(vec![raw(content, 0.9)], 0.3);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn forty_nine_chars_is_rejected() {
        // 10 words, 49 chars total.
        let content = "word word word word word word word word word word";
        assert_eq!(content.len(), 49);
        let out = filter_by_quality_threshold(vec![raw(content, 0.9)], 0.3);
        assert!(out.is_empty());
    }

    #[test]
    fn fewer_than_ten_words_is_rejected() {
        let content = "a".repeat(60);
        let out = filter_by_quality_threshold(vec![raw(&content, 0.9)], 0.3);
        assert!(out.is_empty());
    }

    #[test]
    fn over_max_length_is_rejected() {
        let content = format!("{} ", "word").repeat(300);
        assert!(content.len() > MAX_CONTENT_LENGTH);
        let out = filter_by_quality_threshold(vec![raw(&content, 0.9)], 0.3);
        assert!(out.is_empty());
    }

    #[test]
    fn confidence_exactly_at_threshold_is_accepted() {
        let content = "the lantern flickered across the damp stone corridor all night";
        let out = filter_by_quality_threshold(vec![raw(content, 0.3)], 0.3);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn confidence_just_below_threshold_is_rejected() {
        let content = "the lantern flickered across the damp stone corridor all night";
        let out = filter_by_quality_threshold(vec![raw(content, 0.2999)], 0.3);
        assert!(out.is_empty());
    }

    #[test]
    fn near_duplicate_keeps_higher_confidence() {
        let a = raw("the crumbling castle stood atop the windswept hill at dusk", 0.6);
        let b = raw("the crumbling castle stood atop the windswept hill at dawn", 0.8);
        let out = deduplicate_descriptions(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn distinct_content_is_not_deduped() {
        let a = raw("the crumbling castle stood atop the windswept hill at dusk", 0.6);
        let b = raw("a narrow alley smelled of rain and rust near the docks", 0.6);
        let out = deduplicate_descriptions(vec![a, b]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn priority_score_stays_in_unit_range() {
        let score = calculate_priority_score(DescriptionType::Location, 1.0, 0.9);
        assert!(score <= 1.0);
        let score = calculate_priority_score(DescriptionType::Action, 0.0, 0.1);
        assert!(score >= 0.0);
    }

    #[test]
    fn literary_boost_applies_above_quality_threshold() {
        let boosted = calculate_priority_score(DescriptionType::Object, 0.5, 0.7);
        let plain = calculate_priority_score(DescriptionType::Object, 0.5, 0.69);
        assert!(boosted > plain);
    }
}

/// Property: applying the filter/dedupe/prioritize pipeline twice equals
/// applying it once — once duplicates are collapsed and sub-threshold
/// content is dropped, a second pass has nothing left to change.
#[cfg(test)]
mod idempotence_properties {
    use super::*;
    use proptest::prelude::*;

    fn raw_description() -> impl Strategy<Value = RawDescription> {
        (
            "[a-z]{3,12}( [a-z]{3,12}){9,30}",
            0.0f32..1.0,
        )
            .prop_map(|(content, confidence)| RawDescription::single("location", content, confidence, 0))
    }

    proptest! {
        #[test]
        fn filter_and_prioritize_is_idempotent(
            descriptions in prop::collection::vec(raw_description(), 0..12),
            threshold in 0.0f32..1.0,
        ) {
            let once = filter_and_prioritize_descriptions(descriptions.clone(), threshold);
            let twice = filter_and_prioritize_descriptions(once.clone(), threshold);

            prop_assert_eq!(once.len(), twice.len());
            for (a, b) in once.iter().zip(twice.iter()) {
                prop_assert_eq!(&a.content, &b.content);
                prop_assert!((a.confidence - b.confidence).abs() < 1e-6);
            }
        }
    }
}
