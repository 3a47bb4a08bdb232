//! Risk classification for ingredient lists.
//!
//! Matches normalized ingredient phrases against five fixed term
//! dictionaries and derives an explainable assessment:
//! - per-category matched trigger phrases
//! - risk flags in fixed order
//! - an A/B/C score from the number of scoring categories hit

use labelscan_model::{
    AnalysisPayload, Category, IngredientList, Matches, RiskAssessment, ScoreLabel, DISCLAIMER,
};
use std::collections::BTreeSet;

pub use labelscan_normalize::normalize;

pub const SUGAR_TERMS: &[&str] = &[
    "sugar",
    "glucose",
    "glucose syrup",
    "fructose",
    "corn syrup",
    "high fructose corn syrup",
    "maltodextrin",
    "dextrose",
    "sucrose",
    "invert sugar",
    "honey",
    "molasses",
];

pub const SODIUM_TERMS: &[&str] = &[
    "salt",
    "sodium",
    "sodium chloride",
    "monosodium glutamate",
    "msg",
    "disodium inosinate",
    "disodium guanylate",
    "sodium benzoate",
];

pub const SAT_FAT_TERMS: &[&str] = &[
    "palm oil",
    "palm kernel oil",
    "hydrogenated",
    "partially hydrogenated",
    "shortening",
];

pub const ALLERGEN_TERMS: &[&str] = &[
    "milk",
    "soy",
    "wheat",
    "gluten",
    "peanut",
    "tree nut",
    "egg",
    "fish",
    "shellfish",
    "sesame",
];

pub const ADDITIVE_TERMS: &[&str] = &[
    "e621",
    "e211",
    "e202",
    "e250",
    "e951",
    "aspartame",
    "acesulfame",
    "sucralose",
    "tartrazine",
    "sunset yellow",
    "brilliant blue",
];

/// Trigger phrases for a category.
pub fn dictionary(category: Category) -> &'static [&'static str] {
    match category {
        Category::Sugar => SUGAR_TERMS,
        Category::Sodium => SODIUM_TERMS,
        Category::SatFat => SAT_FAT_TERMS,
        Category::Additives => ADDITIVE_TERMS,
        Category::Allergens => ALLERGEN_TERMS,
    }
}

/// Trigger phrases that occur as a substring of at least one ingredient.
///
/// Containment is not word-aware: "egg" matches "eggplant puree".
/// Result is sorted and unique.
pub fn match_terms<S: AsRef<str>>(ingredients: &[S], terms: &[&'static str]) -> Vec<String> {
    let mut hits = BTreeSet::new();
    for ingredient in ingredients {
        for &term in terms {
            if ingredient.as_ref().contains(term) {
                hits.insert(term);
            }
        }
    }
    hits.into_iter().map(String::from).collect()
}

/// Classify an ingredient list against the fixed dictionaries.
pub fn classify<S: AsRef<str>>(ingredients: &[S]) -> RiskAssessment {
    let mut matches = Matches::default();
    for category in Category::ALL {
        *matches.get_mut(category) = match_terms(ingredients, dictionary(category));
    }

    let risk_flags = matches
        .flagged()
        .map(|category| category.flag_text().to_string())
        .collect();

    let risk_categories = matches.risk_categories();
    let score_label = ScoreLabel::from_risk_categories(risk_categories);

    tracing::debug!(
        ingredients = ingredients.len(),
        risk_categories,
        score = %score_label,
        "classified ingredient list"
    );

    RiskAssessment {
        score_label,
        risk_flags,
        matches,
        disclaimer: DISCLAIMER.to_string(),
    }
}

/// Normalize raw label text and classify it.
///
/// Deterministic: the same text always yields an identical payload.
pub fn analyze(raw_text: &str) -> AnalysisPayload {
    let normalized_ingredients: IngredientList = normalize(raw_text);
    let analysis = classify(normalized_ingredients.as_slice());

    AnalysisPayload {
        raw_text: raw_text.to_string(),
        normalized_ingredients,
        analysis,
    }
}
