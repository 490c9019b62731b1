use threadpulse_schema::Aspect;

/// Ordered keyword rules. The first rule with any keyword present wins.
const ASPECT_RULES: &[(Aspect, &[&str])] = &[
    (Aspect::Performance, &["performance", "lag", "speed", "fast"]),
    (Aspect::Battery, &["battery", "charge", "life"]),
    (Aspect::Design, &["design", "look", "feel"]),
    (Aspect::Software, &["bug", "error"]),
];

/// Tag text with a coarse aspect by case-insensitive substring match.
pub fn tag_aspect(text: &str) -> Aspect {
    let lower = text.to_lowercase();
    ASPECT_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(aspect, _)| *aspect)
        .unwrap_or(Aspect::Overall)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_map_to_aspects() {
        assert_eq!(tag_aspect("So much LAG when scrolling"), Aspect::Performance);
        assert_eq!(tag_aspect("Battery drains by noon"), Aspect::Battery);
        assert_eq!(tag_aspect("Love the new design"), Aspect::Design);
        assert_eq!(tag_aspect("Found a bug in settings"), Aspect::Software);
        assert_eq!(tag_aspect("Just bought one"), Aspect::Overall);
    }

    #[test]
    fn earlier_rule_wins() {
        assert_eq!(tag_aspect("battery bug after update"), Aspect::Battery);
        assert_eq!(tag_aspect("fast charge works"), Aspect::Performance);
    }

    #[test]
    fn matching_is_substring_based() {
        // "lifetime" contains "life", "breakfast" contains "fast"
        assert_eq!(tag_aspect("lifetime warranty"), Aspect::Battery);
        assert_eq!(tag_aspect("over breakfast"), Aspect::Performance);
    }

    #[test]
    fn tagging_is_deterministic() {
        let text = "The look and feel is great but there's an error";
        assert_eq!(tag_aspect(text), tag_aspect(text));
        assert_eq!(tag_aspect(text), Aspect::Design);
    }
}
