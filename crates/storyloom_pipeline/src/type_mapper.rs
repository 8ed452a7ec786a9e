//! Maps a processor's raw label to the fixed [`DescriptionType`] enum: an
//! exact label lookup first, falling back to keyword sniffing in the
//! description content itself so an unfamiliar processor's labels still
//! land somewhere sensible.

use storyloom_db::models::DescriptionType;

/// Exact label → type table, covering common NER/labeling conventions
/// ("GPE"/"LOC" from spaCy-style taggers, "PERSON" for characters, and so
/// on) without assuming any particular processor's vocabulary.
fn map_label(label: &str) -> Option<DescriptionType> {
    match label.to_uppercase().as_str() {
        "LOCATION" | "LOC" | "GPE" | "FAC" | "PLACE" => Some(DescriptionType::Location),
        "PERSON" | "CHARACTER" | "PER" => Some(DescriptionType::Character),
        "ATMOSPHERE" | "MOOD" | "WEATHER" => Some(DescriptionType::Atmosphere),
        "OBJECT" | "ITEM" | "THING" | "PROP" => Some(DescriptionType::Object),
        "ACTION" | "EVENT" => Some(DescriptionType::Action),
        _ => None,
    }
}

const LOCATION_KEYWORDS: &[&str] = &["room", "hall", "street", "forest", "castle", "city", "house"];
const CHARACTER_KEYWORDS: &[&str] = &["he", "she", "they", "man", "woman", "child", "face", "eyes"];
const ATMOSPHERE_KEYWORDS: &[&str] = &["silence", "tension", "smell", "cold", "warmth", "fear"];
const OBJECT_KEYWORDS: &[&str] = &["sword", "book", "table", "door", "ring", "letter"];

fn determine_type_by_keywords(content: &str) -> DescriptionType {
    let lower = content.to_lowercase();
    let score = |keywords: &[&str]| keywords.iter().filter(|k| lower.contains(*k)).count();

    let scores = [
        (DescriptionType::Location, score(LOCATION_KEYWORDS)),
        (DescriptionType::Character, score(CHARACTER_KEYWORDS)),
        (DescriptionType::Atmosphere, score(ATMOSPHERE_KEYWORDS)),
        (DescriptionType::Object, score(OBJECT_KEYWORDS)),
    ];

    scores
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .filter(|(_, count)| *count > 0)
        .map(|(ty, _)| ty)
        .unwrap_or(DescriptionType::Atmosphere)
}

/// Full mapping: trust the processor's label when recognized, otherwise
/// sniff keywords in the description content.
pub fn map_entity_to_description_type(label: &str, content: &str) -> DescriptionType {
    map_label(label).unwrap_or_else(|| determine_type_by_keywords(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_label_wins_over_content() {
        let ty = map_entity_to_description_type("GPE", "he walked into the room");
        assert_eq!(ty, DescriptionType::Location);
    }

    #[test]
    fn unrecognized_label_falls_back_to_keywords() {
        let ty = map_entity_to_description_type("MISC", "the old sword gleamed on the table");
        assert_eq!(ty, DescriptionType::Object);
    }

    #[test]
    fn no_keyword_hits_defaults_to_atmosphere() {
        let ty = map_entity_to_description_type("MISC", "xyzzy plugh qux");
        assert_eq!(ty, DescriptionType::Atmosphere);
    }
}
