//! Five-factor quality scoring: clarity, detail richness, emotional tone,
//! contextual coherence and literary quality, each an independent `[0, 1]`
//! heuristic over text features (word length, vocabulary diversity,
//! sentence density), combined as an equal-weighted mean.

/// Emotion-adjacent vocabulary used by the `emotional_tone` factor.
const EMOTION_MARKERS: &[&str] = &[
    "fear", "joy", "love", "hate", "anger", "sorrow", "dread", "hope", "longing", "grief",
    "terror", "delight", "despair", "rage", "tender",
];

/// Vivid, sensory vocabulary used by the `literary_quality` factor.
const LITERARY_MARKERS: &[&str] = &[
    "shimmer", "gleam", "shadow", "silence", "whisper", "crimson", "golden", "ancient", "echo",
    "glow",
];

fn marker_ratio(lower: &str, markers: &[&str], words: usize) -> f32 {
    if words == 0 {
        return 0.0;
    }
    let hits = markers.iter().filter(|m| lower.contains(*m)).count();
    (hits as f32 / (words as f32 / 20.0).max(1.0)).min(1.0)
}

/// Shorter average word length reads clearer; penalize long, dense words.
fn clarity(words: &[&str]) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    let avg_len = words.iter().map(|w| w.len()).sum::<usize>() as f32 / words.len() as f32;
    (1.0 - ((avg_len - 4.0).max(0.0) / 8.0)).clamp(0.0, 1.0)
}

/// Vocabulary diversity (unique / total words) as a proxy for how much
/// concrete detail a passage packs in, rather than repeating itself.
fn detail_richness(lower: &str, words: &[&str]) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    let unique: std::collections::HashSet<&str> = lower.split_whitespace().collect();
    (unique.len() as f32 / words.len() as f32).clamp(0.0, 1.0)
}

fn emotional_tone(lower: &str, words: &[&str]) -> f32 {
    marker_ratio(lower, EMOTION_MARKERS, words.len())
}

/// Sentence density as a proxy for coherent structure: too few terminal
/// markers over a long passage suggests run-on, incoherent text.
fn contextual_coherence(content: &str, words: &[&str]) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    let sentence_markers = content.matches(['.', '!', '?']).count();
    let density = sentence_markers as f32 / words.len() as f32;
    (density * 10.0).min(1.0)
}

fn literary_quality(lower: &str, words: &[&str]) -> f32 {
    marker_ratio(lower, LITERARY_MARKERS, words.len())
}

/// Overall quality score: equal-weighted mean of the five factors.
pub fn score(content: &str) -> f32 {
    let lower = content.to_lowercase();
    let words: Vec<&str> = content.split_whitespace().collect();

    let factors = [
        clarity(&words),
        detail_richness(&lower, &words),
        emotional_tone(&lower, &words),
        contextual_coherence(content, &words),
        literary_quality(&lower, &words),
    ];

    factors.iter().sum::<f32>() / factors.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_scores_zero() {
        assert_eq!(score(""), 0.0);
    }

    #[test]
    fn vivid_varied_prose_scores_higher_than_flat_repetition() {
        let vivid = "the golden shimmer of dusk fell across the ancient crimson towers. \
            a whisper of dread ran through the silent hall, and shadows gleamed like glass.";
        let flat = "word word word word word word word word word word word word word word.";
        assert!(score(vivid) > score(flat));
    }

    #[test]
    fn score_stays_in_unit_range() {
        let content = "a very long and meandering passage ".repeat(20);
        let s = score(&content);
        assert!((0.0..=1.0).contains(&s));
    }
}
