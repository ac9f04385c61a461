//! Cache keys for the data API.

use std::collections::BTreeMap;
use std::fmt;

/// Resource families served by the data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Cookbook,
    Recipe,
    Ingredient,
    User,
}

impl ResourceKind {
    /// Collection segment in the API path.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Cookbook => "cookbooks",
            ResourceKind::Recipe => "recipes",
            ResourceKind::Ingredient => "ingredients",
            ResourceKind::User => "users",
        }
    }

    pub fn singular(&self) -> &'static str {
        match self {
            ResourceKind::Cookbook => "cookbook",
            ResourceKind::Recipe => "recipe",
            ResourceKind::Ingredient => "ingredient",
            ResourceKind::User => "user",
        }
    }
}

/// Identity of a cacheable request: resource kind, optional id and filter
/// parameters. Two keys address the same entry iff they compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    pub resource: ResourceKind,
    pub id: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl QueryKey {
    pub fn list(resource: ResourceKind) -> Self {
        Self {
            resource,
            id: None,
            params: BTreeMap::new(),
        }
    }

    pub fn item(resource: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            resource,
            id: Some(id.into()),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn cookbooks() -> Self {
        Self::list(ResourceKind::Cookbook)
    }

    pub fn cookbook(id: impl Into<String>) -> Self {
        Self::item(ResourceKind::Cookbook, id)
    }

    pub fn recipe(id: impl Into<String>) -> Self {
        Self::item(ResourceKind::Recipe, id)
    }

    pub fn recipes_by_cookbook(cookbook_id: impl Into<String>) -> Self {
        Self::list(ResourceKind::Recipe).with_param("cookbookId", cookbook_id)
    }

    pub fn ingredients() -> Self {
        Self::list(ResourceKind::Ingredient)
    }

    pub fn ingredient(id: impl Into<String>) -> Self {
        Self::item(ResourceKind::Ingredient, id)
    }

    pub fn users() -> Self {
        Self::list(ResourceKind::User)
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::item(ResourceKind::User, id)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// API path this key is fetched from, e.g. `/recipes?cookbookId=3`.
    pub fn path(&self) -> String {
        let mut path = format!("/{}", self.resource.collection());
        if let Some(id) = &self.id {
            path.push('/');
            path.push_str(&urlencoding::encode(id));
        }
        if !self.params.is_empty() {
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            path.push('?');
            path.push_str(&query.join("&"));
        }
        path
    }

    /// Human name of the requested data, used in "Failed to load ..." messages.
    pub fn describe(&self) -> &'static str {
        if self.id.is_some() {
            self.resource.singular()
        } else {
            self.resource.collection()
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
