//! Explanation generation for ingredient risk assessments.
//!
//! Links every matched trigger phrase back to the ingredient phrases
//! that contained it, and renders one-line summaries for display.

use labelscan_model::{Category, RiskAssessment};
use serde::{Deserialize, Serialize};

/// A structured explanation for one flagged category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub category: Category,

    /// The category's risk flag text
    pub summary: String,

    /// Whether this category contributes to the score label
    pub counts_toward_score: bool,

    /// Evidence items supporting this explanation
    pub evidence: Vec<EvidenceItem>,
}

/// A matched trigger phrase and where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub trigger: String,

    /// Ingredient phrases containing the trigger, in list order
    pub ingredients: Vec<String>,
}

/// Generate explanations for every flagged category, in flag order.
pub fn explain_assessment<S: AsRef<str>>(
    ingredients: &[S],
    assessment: &RiskAssessment,
) -> Vec<Explanation> {
    assessment
        .matches
        .flagged()
        .map(|category| explain_category(ingredients, category, assessment.matches.get(category)))
        .collect()
}

/// Generate the explanation for a single category's matches.
pub fn explain_category<S: AsRef<str>>(
    ingredients: &[S],
    category: Category,
    triggers: &[String],
) -> Explanation {
    let evidence = triggers
        .iter()
        .map(|trigger| EvidenceItem {
            trigger: trigger.clone(),
            ingredients: ingredients
                .iter()
                .map(|ingredient| ingredient.as_ref())
                .filter(|ingredient| ingredient.contains(trigger.as_str()))
                .map(str::to_string)
                .collect(),
        })
        .collect();

    Explanation {
        category,
        summary: category.flag_text().to_string(),
        counts_toward_score: category.is_scoring(),
        evidence,
    }
}

/// Generate a combined one-line summary of an assessment.
pub fn summarize(assessment: &RiskAssessment) -> String {
    let score = assessment.score_label;
    let scoring: Vec<_> = assessment
        .matches
        .flagged()
        .filter(Category::is_scoring)
        .map(|c| c.label())
        .collect();

    if !scoring.is_empty() {
        return format!("Score {}: {}", score, scoring.join(", "));
    }

    if assessment.matches.allergens.is_empty() {
        format!("Score {}: no risk cues found", score)
    } else {
        format!("Score {}: allergen cues only", score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelscan_analyze::{analyze, classify};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_evidence_links_trigger_to_ingredients() {
        let ingredients = ["glucose syrup", "sugar", "invert sugar syrup"];
        let assessment = classify(&ingredients);
        let explanations = explain_assessment(&ingredients, &assessment);

        assert_eq!(explanations.len(), 1);
        let sugar = &explanations[0];
        assert_eq!(sugar.category, Category::Sugar);
        assert!(sugar.counts_toward_score);

        let for_sugar = sugar
            .evidence
            .iter()
            .find(|e| e.trigger == "sugar")
            .unwrap();
        assert_eq!(for_sugar.ingredients, vec!["sugar", "invert sugar syrup"]);
    }

    #[test]
    fn test_explanations_follow_flag_order() {
        let payload = analyze("Milk, Salt, Sugar, E621");
        let explanations =
            explain_assessment(payload.normalized_ingredients.as_slice(), &payload.analysis);

        let categories: Vec<_> = explanations.iter().map(|e| e.category).collect();
        assert_eq!(
            categories,
            vec![Category::Sugar, Category::Sodium, Category::Additives, Category::Allergens]
        );
        let summaries: Vec<_> = explanations.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(summaries, payload.analysis.risk_flags);
        assert!(!explanations[3].counts_toward_score);
    }

    #[test]
    fn test_summarize() {
        assert_eq!(
            summarize(&classify(&["sugar", "salt", "palm oil", "aspartame"])),
            "Score C: Sugar, Sodium, Saturated fat, Additives"
        );
        assert_eq!(summarize(&classify(&["water"])), "Score A: no risk cues found");
        assert_eq!(summarize(&classify(&["peanuts"])), "Score A: allergen cues only");
    }
}
