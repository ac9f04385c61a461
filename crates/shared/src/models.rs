//! Data models returned by the cookbook REST API.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// --- Common Definitions ---

/// Identifier of a remote resource.
///
/// The API is not consistent about id types (numeric in some collections,
/// string in others), so both forms are accepted and kept as text.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Uint(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => ResourceId(s),
            Raw::Int(n) => ResourceId(n.to_string()),
            Raw::Uint(n) => ResourceId(n.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

// --- Cookbooks ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cookbook {
    pub id: ResourceId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub recipe_count: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
}

// --- Recipes ---

/// Master record an ingredient line refers to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngredientMaster {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// One ingredient line of a recipe (quantity, unit and preparation are free text).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeIngredient {
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub preparation: Option<String>,
    pub ingredients_master: IngredientMaster,
}

impl RecipeIngredient {
    /// Human readable line, e.g. `2 cups flour (sifted)`.
    pub fn display_line(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(q) = self.quantity.as_deref().filter(|q| !q.trim().is_empty()) {
            parts.push(q);
        }
        if let Some(u) = self.unit.as_deref().filter(|u| !u.trim().is_empty()) {
            parts.push(u);
        }
        parts.push(&self.ingredients_master.name);

        let line = parts.join(" ");
        match self.preparation.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(prep) => format!("{line} ({prep})"),
            None => line,
        }
    }
}

/// A recipe as returned by `/recipes/{id}` and `/recipes?cookbookId=`.
///
/// The detail endpoint fills `recipe_ingredients`, the listing fills the flat
/// `ingredients` list; both default to empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipe {
    pub id: ResourceId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub prep_time: Option<u32>,
    #[serde(default)]
    pub servings: Option<u32>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default, alias = "cookbookId")]
    pub cookbook_id: Option<ResourceId>,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub recipe_ingredients: Vec<RecipeIngredient>,
}

// --- Ingredients ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ingredient {
    pub id: ResourceId,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

// --- Users ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: ResourceId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "displayName")]
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_accepts_numbers_and_strings() {
        let a: Cookbook = serde_json::from_str(r#"{"id": 7, "title": "Italian Classics"}"#).unwrap();
        let b: Cookbook = serde_json::from_str(r#"{"id": "7", "title": "Italian Classics"}"#).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.as_str(), "7");
        assert_eq!(a.recipe_count, None);
    }

    #[test]
    fn recipe_listing_uses_camel_case_cookbook_id() {
        let json = r#"{
            "id": "r1",
            "title": "Chocolate Chip Cookies",
            "ingredients": ["flour", "butter"],
            "instructions": "Mix and bake",
            "cookbookId": "c9"
        }"#;
        let recipe: Recipe = serde_json::from_str(json).unwrap();
        assert_eq!(recipe.cookbook_id, Some(ResourceId::from("c9")));
        assert_eq!(recipe.ingredients.len(), 2);
        assert!(recipe.recipe_ingredients.is_empty());
    }

    #[test]
    fn recipe_detail_lines() {
        let json = r#"{
            "id": 3,
            "title": "Classic Margherita Pizza",
            "difficulty": "medium",
            "instructions": "Bake hot",
            "recipe_ingredients": [
                {"quantity": "2", "unit": "cups", "preparation": "sifted",
                 "ingredients_master": {"name": "flour", "category": "baking"}},
                {"quantity": null, "unit": null, "preparation": null,
                 "ingredients_master": {"name": "basil", "category": null}}
            ]
        }"#;
        let recipe: Recipe = serde_json::from_str(json).unwrap();
        assert_eq!(recipe.difficulty, Some(Difficulty::Medium));
        let lines: Vec<String> = recipe.recipe_ingredients.iter().map(|i| i.display_line()).collect();
        assert_eq!(lines, vec!["2 cups flour (sifted)".to_string(), "basil".to_string()]);
    }
}
