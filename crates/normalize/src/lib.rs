//! Ingredient text normalization.
//!
//! Turns raw OCR'd label text into an ordered, deduplicated list of
//! ingredient phrases:
//! - lowercase
//! - strip `(...)` and `[...]` asides
//! - unify `;`, `•`, `·` into commas and split
//! - drop fragments shorter than two characters
//! - collapse whitespace and deduplicate in first-seen order

use labelscan_model::IngredientList;
use regex::Regex;
use std::sync::LazyLock;

/// Separators treated the same as a comma.
const SEPARATORS: [char; 3] = [';', '•', '·'];

/// Minimum length (in characters) of a kept phrase.
const MIN_PHRASE_CHARS: usize = 2;

// Non-greedy so each group on a line is stripped on its own. An unmatched
// opening bracket has no closing match and is left in place.
static PARENTHESIZED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(.*?\)").unwrap());
static BRACKETED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[.*?\]").unwrap());
// Unicode whitespace plus the ASCII information separators (FS, GS, RS, US),
// which OCR output occasionally carries and which count as whitespace for
// label text.
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\x1C-\x1F]+").unwrap());

/// Normalize raw label text into ingredient phrases.
///
/// Total over any input: empty or unparseable text yields an empty list.
pub fn normalize(raw_text: &str) -> IngredientList {
    let lowered = raw_text.to_lowercase();
    let stripped = strip_asides(&lowered);
    let unified = unify_separators(&stripped);

    let ingredients: IngredientList = unified
        .split(',')
        .map(trim_label_whitespace)
        .filter(|segment| segment.chars().count() >= MIN_PHRASE_CHARS)
        .map(collapse_whitespace)
        .collect();

    tracing::debug!(
        input_bytes = raw_text.len(),
        ingredients = ingredients.len(),
        "normalized label text"
    );

    ingredients
}

/// Replace every parenthesized and bracketed span with a single space.
pub fn strip_asides(text: &str) -> String {
    let without_parens = PARENTHESIZED.replace_all(text, " ");
    BRACKETED.replace_all(&without_parens, " ").into_owned()
}

/// Rewrite alternative list separators as commas.
pub fn unify_separators(text: &str) -> String {
    text.replace(&SEPARATORS[..], ",")
}

/// Collapse runs of whitespace to one space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

fn is_label_whitespace(c: char) -> bool {
    c.is_whitespace() || ('\u{1C}'..='\u{1F}').contains(&c)
}

fn trim_label_whitespace(text: &str) -> &str {
    text.trim_matches(is_label_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn phrases(raw: &str) -> Vec<String> {
        normalize(raw).into_vec()
    }

    #[test]
    fn test_strips_brackets_and_contents() {
        assert_eq!(
            phrases("Wheat Flour (enriched), Sugar [cane]"),
            vec!["wheat flour", "sugar"]
        );
    }

    #[test]
    fn test_multiple_groups_on_one_line() {
        assert_eq!(
            phrases("Cocoa (22%) Butter (from milk), Salt"),
            vec!["cocoa butter", "salt"]
        );
    }

    #[test]
    fn test_unifies_delimiters() {
        assert_eq!(phrases("Milk • Salt · Sugar"), vec!["milk", "salt", "sugar"]);
        assert_eq!(phrases("Milk; Salt; Sugar"), vec!["milk", "salt", "sugar"]);
    }

    #[test]
    fn test_dedup_preserves_first_seen_order() {
        assert_eq!(
            phrases("Sugar, Salt, SUGAR, water,  salt "),
            vec!["sugar", "salt", "water"]
        );
    }

    #[test]
    fn test_drops_short_fragments() {
        assert_eq!(phrases("a, , x,salt,,  ,b "), vec!["salt"]);
    }

    #[test]
    fn test_collapses_internal_whitespace() {
        assert_eq!(
            phrases("palm   kernel\toil,\nglucose \n syrup"),
            vec!["palm kernel oil", "glucose syrup"]
        );
    }

    #[test]
    fn test_information_separators_are_whitespace() {
        assert_eq!(phrases("\u{1c}ab\u{1c}, cd"), vec!["ab", "cd"]);
        assert_eq!(phrases("palm\u{1f}oil, \u{1d}\u{1e}x"), vec!["palm oil"]);
        assert_eq!(collapse_whitespace("\u{1c} glucose\u{1f}\u{1f}syrup "), "glucose syrup");
    }

    #[test]
    fn test_empty_and_degenerate_input() {
        assert!(normalize("").is_empty());
        assert!(normalize(" , ; • ").is_empty());
        assert_eq!(phrases("water"), vec!["water"]);
    }

    #[test]
    fn test_unmatched_bracket_is_left_alone() {
        assert_eq!(phrases("Sugar (cane, Salt"), vec!["sugar (cane", "salt"]);
        assert_eq!(phrases("Sugar), Salt"), vec!["sugar)", "salt"]);
    }

    #[test]
    fn test_brackets_do_not_span_lines() {
        assert_eq!(
            phrases("Sugar (cane\nbeet), Salt"),
            vec!["sugar (cane beet)", "salt"]
        );
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let samples = [
            "Wheat Flour (enriched), Sugar [cane]",
            "Milk • Salt · Sugar",
            "  Palm  Oil; palm oil ; E621, Sugar (cane, Salt",
            "INGREDIENTS: Water, Natural Flavor, Citric Acid",
            "",
        ];
        for raw in samples {
            let first = normalize(raw);
            let again = normalize(&first.join(" , "));
            assert_eq!(again, first, "input: {raw:?}");
        }
    }

    #[test]
    fn test_output_invariants() {
        let samples = [
            "Sugar,, sugar ,SUGAR,  Glucose   Syrup [from corn] ; e  , x",
            "(all in brackets), [more]",
            "Ingredients: Enriched flour (wheat flour, niacin), sugar • salt",
        ];
        for raw in samples {
            let list = normalize(raw);
            let unique: std::collections::HashSet<_> = list.iter().collect();
            assert_eq!(unique.len(), list.len());
            for phrase in &list {
                assert!(phrase.chars().count() >= 2, "{phrase:?}");
                assert!(!phrase.contains("  "), "{phrase:?}");
                assert_eq!(phrase.trim(), phrase);
            }
        }
    }
}
