//! Weighted-consensus voting across processor outputs: descriptions that
//! several processors agree on (by trigram similarity of content) are
//! merged into one, with confidence set from their combined agreement; lone
//! descriptions are accepted only if their source processor's weight alone
//! clears `consensus_threshold`.

use crate::description_filter::trigram_similarity;
use crate::processor::RawDescription;

const AGREEMENT_SIMILARITY: f32 = 0.8;

/// Maximum total length of the enriched `context` field, in characters.
const CONTEXT_SNIPPET_CAP: usize = 400;

/// One processor's vote: its raw description, its configured weight, and
/// enough identity to resolve representative-selection ties (prefer the
/// processor with the highest `priority_rank`).
pub struct ProcessorVote {
    pub description: RawDescription,
    pub weight: f32,
    pub processor_name: String,
    pub priority_rank: u8,
}

/// Groups raw descriptions from multiple processors into consensus votes
/// and returns one merged [`RawDescription`] per cluster that clears
/// `consensus_threshold`, its `n_sources` set to the cluster's size so
/// callers can apply [`priority_boost`] uniformly.
pub fn vote(candidates: Vec<ProcessorVote>, consensus_threshold: f32) -> Vec<RawDescription> {
    let mut groups: Vec<Vec<ProcessorVote>> = Vec::new();
    'outer: for item in candidates {
        for group in groups.iter_mut() {
            if trigram_similarity(&item.description.content, &group[0].description.content)
                >= AGREEMENT_SIMILARITY
            {
                group.push(item);
                continue 'outer;
            }
        }
        groups.push(vec![item]);
    }

    groups
        .into_iter()
        .filter_map(|group| merge_group(group, consensus_threshold))
        .collect()
}

fn merge_group(group: Vec<ProcessorVote>, consensus_threshold: f32) -> Option<RawDescription> {
    let total_weight: f32 = group.iter().map(|g| g.weight).sum();
    if total_weight <= 0.0 {
        return None;
    }

    // Edge case: a single-source cluster is accepted only if
    // that processor's weight alone clears the threshold — the general
    // `vote_sum / total_weight` formula would otherwise always equal that
    // processor's own confidence and bypass the threshold's intent.
    if group.len() == 1 {
        let solo = &group[0];
        if solo.weight < consensus_threshold {
            return None;
        }
        return Some(RawDescription {
            confidence: solo.description.confidence.clamp(0.0, 1.0),
            n_sources: 1,
            ..solo.description.clone()
        });
    }

    let vote_sum: f32 = group
        .iter()
        .map(|g| g.weight * g.description.confidence)
        .sum();
    let agreement = vote_sum / total_weight;
    if agreement < consensus_threshold {
        return None;
    }

    // Representative: highest confidence*weight; ties broken by priority_rank.
    let best_idx = group
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            let score_a = a.weight * a.description.confidence;
            let score_b = b.weight * b.description.confidence;
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.priority_rank.cmp(&b.priority_rank).reverse())
        })
        .map(|(idx, _)| idx)
        .expect("group is non-empty");

    let n_sources = group.len();
    let context = enrich_context(&group, best_idx);
    let representative = &group[best_idx].description;
    Some(RawDescription {
        confidence: agreement.clamp(0.0, 1.0),
        context: context.or_else(|| representative.context.clone()),
        n_sources,
        ..representative.clone()
    })
}

/// Priority multiplier for an accepted cluster of `n_sources` agreeing
/// processors ("boost priority by `1 + 0.1 × (n_sources − 1)`").
/// `pipeline.rs` multiplies this into
/// `description_filter::calculate_priority_score`'s output and clamps the
/// product at 1.0, since priority scoring owns the final cap and this
/// module only owns consensus.
pub fn priority_boost(n_sources: usize) -> f32 {
    1.0 + 0.1 * (n_sources as f32 - 1.0)
}

/// Concatenate unique context/content snippets from every other member of
/// the cluster onto the representative's context, capped in size.
fn enrich_context(group: &[ProcessorVote], representative_idx: usize) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for (idx, vote) in group.iter().enumerate() {
        if idx == representative_idx {
            continue;
        }
        let snippet = vote
            .description
            .context
            .clone()
            .unwrap_or_else(|| vote.description.content.clone());
        if !parts.iter().any(|p: &String| p == &snippet) {
            parts.push(snippet);
        }
    }
    if parts.is_empty() {
        return None;
    }
    let mut joined = parts.join(" | ");
    joined.truncate(CONTEXT_SNIPPET_CAP);
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(content: &str, confidence: f32) -> RawDescription {
        RawDescription {
            label: "location".to_string(),
            content: content.to_string(),
            context: None,
            confidence,
            position: 0,
            n_sources: 1,
        }
    }

    fn vote_of(content: &str, confidence: f32, weight: f32, name: &str, rank: u8) -> ProcessorVote {
        ProcessorVote {
            description: desc(content, confidence),
            weight,
            processor_name: name.to_string(),
            priority_rank: rank,
        }
    }

    #[test]
    fn agreeing_descriptions_merge_to_weighted_agreement() {
        let candidates = vec![
            vote_of("the old stone tower loomed over the square", 0.9, 0.5, "a", 0),
            vote_of("the old stone tower loomed above the square", 0.7, 0.5, "b", 1),
        ];
        let result = vote(candidates, 0.5);
        assert_eq!(result.len(), 1);
        assert!((result[0].confidence - 0.8).abs() < 1e-5);
        assert_eq!(result[0].n_sources, 2);
    }

    #[test]
    fn lone_description_below_weight_threshold_is_dropped() {
        let candidates = vec![vote_of("a quiet room in the tower", 0.9, 0.2, "a", 0)];
        let result = vote(candidates, 0.5);
        assert!(result.is_empty());
    }

    #[test]
    fn lone_description_above_weight_threshold_is_accepted() {
        let candidates = vec![vote_of("a quiet room in the tower", 0.9, 0.6, "a", 0)];
        let result = vote(candidates, 0.5);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn distinct_descriptions_stay_separate() {
        let candidates = vec![
            vote_of("a dark forest at midnight", 0.7, 0.6, "a", 0),
            vote_of("bright sunlit meadow by the river", 0.7, 0.6, "b", 0),
        ];
        let result = vote(candidates, 0.5);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn context_enriched_from_other_sources() {
        let candidates = vec![
            vote_of("the old stone tower loomed over the square", 0.9, 0.5, "a", 0),
            vote_of("the old stone tower loomed above the square", 0.7, 0.5, "b", 1),
        ];
        let result = vote(candidates, 0.5);
        assert!(result[0].context.is_some());
    }
}

/// Property: increasing any processor's weight (all else equal) never
/// decreases a surviving description's consensus score. The weighted mean
/// `vote_sum / total_weight` can only move toward the value of the source
/// whose weight grows; bumping the weight of whichever source already holds
/// the cluster's *highest* confidence can therefore only raise (or hold)
/// the agreement score, never lower it.
#[cfg(test)]
mod monotonicity_properties {
    use super::*;
    use proptest::prelude::*;

    const CONTENT: &str = "the old stone tower loomed over the empty square at dusk";

    fn cluster(weights: &[f32], confidences: &[f32]) -> Vec<ProcessorVote> {
        weights
            .iter()
            .zip(confidences.iter())
            .enumerate()
            .map(|(i, (&weight, &confidence))| ProcessorVote {
                description: RawDescription {
                    label: "location".to_string(),
                    content: CONTENT.to_string(),
                    context: None,
                    confidence,
                    position: 0,
                    n_sources: 1,
                },
                weight,
                processor_name: format!("p{i}"),
                priority_rank: i as u8,
            })
            .collect()
    }

    proptest! {
        #[test]
        fn bumping_the_max_confidence_source_never_lowers_agreement(
            weights in prop::collection::vec(0.1f32..5.0, 2..5),
            confidences in prop::collection::vec(0.0f32..1.0, 2..5),
            delta in 0.1f32..5.0,
        ) {
            let n = weights.len().min(confidences.len());
            let weights = &weights[..n];
            let confidences = &confidences[..n];
            prop_assume!(n >= 2);

            let max_idx = (0..n)
                .max_by(|&a, &b| confidences[a].partial_cmp(&confidences[b]).unwrap())
                .unwrap();

            let before = vote(cluster(weights, confidences), 0.0);
            prop_assert_eq!(before.len(), 1);
            let before_agreement = before[0].confidence;

            let mut bumped_weights = weights.to_vec();
            bumped_weights[max_idx] += delta;
            let after = vote(cluster(&bumped_weights, confidences), 0.0);
            prop_assert_eq!(after.len(), 1);
            let after_agreement = after[0].confidence;

            prop_assert!(after_agreement >= before_agreement - 1e-5);
        }
    }
}
