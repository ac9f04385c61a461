//! HTTP client for the cookbook REST API.

use std::time::Duration;

use cookbook_shared::{Cookbook, Ingredient, NetworkError, Recipe, User};
use reqwest::Client;
use serde::de::DeserializeOwned;

/// Read-only client for the cookbook data API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError::Network(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client sharing an existing connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, NetworkError> {
        let url = self.url(path);
        tracing::debug!("GET {url}");

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| NetworkError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| NetworkError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            tracing::debug!("GET {url} failed with HTTP {status}");
            return Err(NetworkError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| NetworkError::Deserialize(e.to_string()))
    }

    // --- Endpoints ---

    pub async fn cookbooks(&self) -> Result<Vec<Cookbook>, NetworkError> {
        self.get_json("/cookbooks").await
    }

    pub async fn cookbook(&self, id: &str) -> Result<Cookbook, NetworkError> {
        self.get_json(&format!("/cookbooks/{}", urlencoding::encode(id)))
            .await
    }

    pub async fn recipe(&self, id: &str) -> Result<Recipe, NetworkError> {
        self.get_json(&format!("/recipes/{}", urlencoding::encode(id)))
            .await
    }

    pub async fn recipes_by_cookbook(&self, cookbook_id: &str) -> Result<Vec<Recipe>, NetworkError> {
        self.get_json(&format!(
            "/recipes?cookbookId={}",
            urlencoding::encode(cookbook_id)
        ))
        .await
    }

    pub async fn ingredients(&self) -> Result<Vec<Ingredient>, NetworkError> {
        self.get_json("/ingredients").await
    }

    pub async fn ingredient(&self, id: &str) -> Result<Ingredient, NetworkError> {
        self.get_json(&format!("/ingredients/{}", urlencoding::encode(id)))
            .await
    }

    pub async fn users(&self) -> Result<Vec<User>, NetworkError> {
        self.get_json("/users").await
    }

    pub async fn user(&self, id: &str) -> Result<User, NetworkError> {
        self.get_json(&format!("/users/{}", urlencoding::encode(id)))
            .await
    }
}
