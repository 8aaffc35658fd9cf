//! Approximate comparison of recorded area names against boundary feature names.

/// Share of the shorter token list that must overlap for a token match.
const TOKEN_OVERLAP_RATIO: f64 = 0.7;
/// Tokens of the first name shorter than this are not counted.
const MIN_TOKEN_LEN: usize = 3;

/// Lower-cases, drops everything but word characters and whitespace, and collapses
/// whitespace runs to single spaces.
pub fn normalize(name: &str) -> String {
    let stripped: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True if the two names are equal after normalizing, one contains the other, or enough
/// of their tokens overlap.
///
/// The token tier is not symmetric: only tokens of `a` are filtered by length, while the
/// threshold is taken from the shorter of the two token lists.
pub fn fuzzy_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }

    if a == b {
        return true;
    }

    if a.contains(&b) || b.contains(&a) {
        return true;
    }

    token_overlap(&a, &b)
}

fn token_overlap(a: &str, b: &str) -> bool {
    let tokens_a: Vec<&str> = a.split(' ').collect();
    let tokens_b: Vec<&str> = b.split(' ').collect();

    let matching = tokens_a
        .iter()
        .copied()
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .filter(|t| tokens_b.iter().any(|u| u.contains(*t) || t.contains(*u)))
        .count();

    let smaller = tokens_a.len().min(tokens_b.len());
    matching as f64 >= smaller as f64 * TOKEN_OVERLAP_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_whitespace() {
        assert_eq!(normalize("  Swan   Coastal\tDistrict "), "swan coastal district");
        assert_eq!(normalize("Leeuwin-Naturaliste (WA)"), "leeuwinnaturaliste wa");
        assert_eq!(normalize("- Pilbara -"), "pilbara");
        assert_eq!(normalize("Kimberley_North"), "kimberley_north");
    }

    #[test]
    fn normalize_is_idempotent() {
        for name in [
            "Swan Coastal District",
            "  Perth   Hills! ",
            "South-West Region",
            "- Goldfields / Esperance -",
            "Ngaanyatjarra, Lands",
            "",
        ] {
            let once = normalize(name);
            assert_eq!(normalize(&once), once, "{name:?}");
        }
    }

    #[test]
    fn exact_after_normalizing() {
        assert!(fuzzy_match("Swan Coastal District", "swan coastal district"));
    }

    #[test]
    fn containment_either_way() {
        assert!(fuzzy_match("Perth Hills", "Perth Hills Regional Park"));
        assert!(fuzzy_match("Perth Hills Regional Park", "Perth Hills"));
    }

    #[test]
    fn token_overlap_above_threshold() {
        // "south" and "west" are both inside "southwest": 2 >= 0.7 * 2.
        assert!(fuzzy_match("South West Region", "Southwest Area"));
    }

    #[test]
    fn token_overlap_below_threshold() {
        // Only "valley" overlaps: 1 < 0.7 * 3.
        assert!(!fuzzy_match("Swan Valley Catchment", "Avon Valley Basin"));
    }

    #[test]
    fn token_overlap_is_asymmetric() {
        // Short tokens of the first name never count, but short tokens of the second
        // still match as candidates ("alba" contains "al").
        assert!(!fuzzy_match("Al Ba Ranges North", "Ranges North Alba"));
        assert!(fuzzy_match("Ranges North Alba", "Al Ba Ranges North"));
    }

    #[test]
    fn empty_names_never_match() {
        assert!(!fuzzy_match("", "Pilbara"));
        assert!(!fuzzy_match("!!!", "Pilbara"));
        assert!(!fuzzy_match("", ""));
    }

    #[test]
    fn unrelated_names_do_not_match() {
        assert!(!fuzzy_match("Kimberley", "Great Southern"));
    }
}
