//! Core domain model for label scanning.
//!
//! This crate defines the fundamental types used throughout the system:
//! - `IngredientList`: ordered, deduplicated ingredient phrases
//! - `Category`: the five term dictionaries (sugar, sodium, ...)
//! - `ScoreLabel`: A, B or C
//! - `RiskAssessment`: score, flags and per-category matches
//! - `AnalysisPayload`: the immutable bundle handed to persistence

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::ops::Deref;
use thiserror::Error;

/// Fixed disclaimer attached to every assessment.
pub const DISCLAIMER: &str = "This is a non-medical, ingredient-cue-based estimate aligned to \
general healthy eating guidance. Always verify packaging and consult professionals for medical advice.";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Analysis payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Analysis payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// One of the five curated term dictionaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sugar,
    Sodium,
    SatFat,
    Additives,
    Allergens,
}

impl Category {
    /// All categories, in the order their flags are reported.
    pub const ALL: [Category; 5] = [
        Self::Sugar,
        Self::Sodium,
        Self::SatFat,
        Self::Additives,
        Self::Allergens,
    ];

    /// Key used in serialized `matches`.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Sugar => "sugar",
            Self::Sodium => "sodium",
            Self::SatFat => "sat_fat",
            Self::Additives => "additives",
            Self::Allergens => "allergens",
        }
    }

    /// Get a human-readable label for this category.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sugar => "Sugar",
            Self::Sodium => "Sodium",
            Self::SatFat => "Saturated fat",
            Self::Additives => "Additives",
            Self::Allergens => "Allergens",
        }
    }

    /// Risk flag text reported when this category has at least one match.
    pub fn flag_text(&self) -> &'static str {
        match self {
            Self::Sugar => "High in added sugars (based on ingredient cues)",
            Self::Sodium => "Likely high sodium / salt (based on ingredient cues)",
            Self::SatFat => "Contains saturated fat sources (e.g., palm/hydrogenated oils)",
            Self::Additives => "Contains food additives / sweeteners (consume in moderation)",
            Self::Allergens => "Potential allergens detected (check if you have allergies)",
        }
    }

    /// Whether a match in this category counts toward the score label.
    ///
    /// Allergens are reported but never affect the score.
    pub fn is_scoring(&self) -> bool {
        !matches!(self, Self::Allergens)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Letter score derived from the number of scoring categories hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreLabel {
    A,
    B,
    C,
}

impl ScoreLabel {
    /// 0 categories is A, 1-2 is B, 3 or more is C.
    pub fn from_risk_categories(count: usize) -> Self {
        match count {
            0 => Self::A,
            1 | 2 => Self::B,
            _ => Self::C,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl fmt::Display for ScoreLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, deduplicated list of normalized ingredient phrases.
///
/// Order is first-seen order in the source text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IngredientList(Vec<String>);

impl IngredientList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl Deref for IngredientList {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

/// Keeps the first occurrence of each phrase, in iteration order.
impl FromIterator<String> for IngredientList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let phrases = iter
            .into_iter()
            .filter(|phrase| seen.insert(phrase.clone()))
            .collect();
        Self(phrases)
    }
}

impl<'a> IntoIterator for &'a IngredientList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Matched trigger phrases per category.
///
/// Always serializes all five keys; each list is sorted and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matches {
    #[serde(default)]
    pub sugar: Vec<String>,
    #[serde(default)]
    pub sodium: Vec<String>,
    #[serde(default)]
    pub sat_fat: Vec<String>,
    #[serde(default)]
    pub additives: Vec<String>,
    #[serde(default)]
    pub allergens: Vec<String>,
}

impl Matches {
    pub fn get(&self, category: Category) -> &[String] {
        match category {
            Category::Sugar => &self.sugar,
            Category::Sodium => &self.sodium,
            Category::SatFat => &self.sat_fat,
            Category::Additives => &self.additives,
            Category::Allergens => &self.allergens,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut Vec<String> {
        match category {
            Category::Sugar => &mut self.sugar,
            Category::Sodium => &mut self.sodium,
            Category::SatFat => &mut self.sat_fat,
            Category::Additives => &mut self.additives,
            Category::Allergens => &mut self.allergens,
        }
    }

    /// Categories with at least one match, in flag order.
    pub fn flagged(&self) -> impl Iterator<Item = Category> + '_ {
        Category::ALL
            .into_iter()
            .filter(|c| !self.get(*c).is_empty())
    }

    /// Number of scoring categories (everything except allergens) with a match.
    pub fn risk_categories(&self) -> usize {
        self.flagged().filter(Category::is_scoring).count()
    }
}

/// Explainable health-risk classification of an ingredient list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score_label: ScoreLabel,

    /// Human-readable flags in fixed category order
    pub risk_flags: Vec<String>,

    pub matches: Matches,

    pub disclaimer: String,
}

/// Raw text, normalized ingredients and assessment from one analysis.
///
/// Persistence stores this verbatim as a serialized blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub raw_text: String,
    pub normalized_ingredients: IngredientList,
    pub analysis: RiskAssessment,
}

impl AnalysisPayload {
    /// Serialize to single-line JSON with `", "` and `": "` separators.
    /// Non-ASCII text is written as-is.
    ///
    /// Stored payload blobs use this exact layout, so existing records
    /// compare byte for byte with freshly written ones.
    pub fn to_json(&self) -> Result<String, ModelError> {
        let mut buf = Vec::with_capacity(256);
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Single-line JSON with a space after every `,` and `:`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}
