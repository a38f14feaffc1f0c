//! Structured output of a vision provider's analysis of a food image.
//!
//! Field names follow the camelCase JSON the providers emit, so these types
//! deserialize the model reply directly and serialize unchanged into API
//! responses and the persisted payload column.

use serde::{Deserialize, Serialize};

/// A single recognized ingredient, ordered by prominence.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub name: String,
    pub order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_highlighted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Label-style nutrition facts. Every numeric is optional; providers fill
/// in whatever they can infer from the image.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NutritionFacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serving_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servings_per_container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_fat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturated_fat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trans_fat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cholesterol: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sodium: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_carbs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dietary_fiber: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_sugars: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_sugars: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vitamin_d: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calcium: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iron: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub potassium: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_notes: Option<String>,
}

/// Allergen called out by the provider (e.g. "Contains", "May Contain").
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Allergen {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagKind {
    Positive,
    Negative,
    Neutral,
}

/// A health-related observation ("High Protein", "Processed Food", ...).
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HealthFlag {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FlagKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Full structured result of one provider analysis.
///
/// `is_food == false` is a valid provider outcome, not a provider error;
/// the orchestrator is responsible for translating it into a typed failure
/// before anything is marked completed.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Providers that omit the field are assumed to have seen food.
    #[serde(default = "default_is_food")]
    pub is_food: bool,

    /// What the provider saw instead of food, when `is_food` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal_description: Option<String>,

    #[serde(default)]
    pub ingredients: Vec<Ingredient>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nutrition_facts: Option<NutritionFacts>,

    #[serde(default)]
    pub allergens: Vec<Allergen>,
    #[serde(default)]
    pub health_flags: Vec<HealthFlag>,

    /// Overall confidence in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Opaque provider-specific blob kept for auditing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
}

fn default_is_food() -> bool {
    true
}

impl AnalysisResult {
    /// Nutrition totals denormalized onto the record for query filtering:
    /// (calories, sugars, carbs, protein).
    pub fn derived_metrics(&self) -> (Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
        match &self.nutrition_facts {
            Some(n) => (n.calories, n.total_sugars, n.total_carbs, n.protein),
            None => (None, None, None, None),
        }
    }
}
