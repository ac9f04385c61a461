//! Client configuration from environment variables.

use std::time::Duration;

use url::Url;

use crate::query::{QueryConfig, RetryConfig};

const API_BASE_URL: &str = "COOKBOOK_API_BASE_URL";
const FIREBASE_API_KEY: &str = "COOKBOOK_FIREBASE_API_KEY";
const FIREBASE_PROJECT_ID: &str = "COOKBOOK_FIREBASE_PROJECT_ID";
const AUTH_TIMEOUT_MS: &str = "COOKBOOK_AUTH_TIMEOUT_MS";
const HTTP_TIMEOUT_MS: &str = "COOKBOOK_HTTP_TIMEOUT_MS";
const QUERY_STALE_MS: &str = "COOKBOOK_QUERY_STALE_MS";
const QUERY_RETRIES: &str = "COOKBOOK_QUERY_RETRIES";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Identity provider and profile store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub project_id: String,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: Url,
    pub firebase: FirebaseConfig,
    /// How long the session may stay `initializing` without any provider event.
    pub auth_init_timeout: Duration,
    pub http_timeout: Duration,
    pub query: QueryConfig,
}

impl ClientConfig {
    /// Read configuration from the process environment.
    ///
    /// Environment variables:
    /// - `COOKBOOK_API_BASE_URL`: base URL of the data API (required)
    /// - `COOKBOOK_FIREBASE_API_KEY`: identity provider web API key (required)
    /// - `COOKBOOK_FIREBASE_PROJECT_ID`: profile store project (required)
    /// - `COOKBOOK_AUTH_TIMEOUT_MS`: initializing timeout (default: 3000)
    /// - `COOKBOOK_HTTP_TIMEOUT_MS`: per-request timeout (default: 15000)
    /// - `COOKBOOK_QUERY_STALE_MS`: age after which cached data is refetched (default: never)
    /// - `COOKBOOK_QUERY_RETRIES`: retries for transient fetch failures (default: 0)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<&'static str> = [API_BASE_URL, FIREBASE_API_KEY, FIREBASE_PROJECT_ID]
            .into_iter()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let raw_url = get(API_BASE_URL).unwrap_or_default();
        let api_base_url = Url::parse(raw_url.trim()).map_err(|e| ConfigError::Invalid {
            key: API_BASE_URL,
            reason: e.to_string(),
        })?;

        let millis = |key: &'static str| -> Result<Option<Duration>, ConfigError> {
            get(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|e| ConfigError::Invalid {
                            key,
                            reason: e.to_string(),
                        })
                })
                .transpose()
        };

        let retries = get(QUERY_RETRIES)
            .map(|v| {
                v.trim().parse::<u32>().map_err(|e| ConfigError::Invalid {
                    key: QUERY_RETRIES,
                    reason: e.to_string(),
                })
            })
            .transpose()?
            .unwrap_or(0);

        Ok(Self {
            api_base_url,
            firebase: FirebaseConfig {
                api_key: get(FIREBASE_API_KEY).unwrap_or_default(),
                project_id: get(FIREBASE_PROJECT_ID).unwrap_or_default(),
            },
            auth_init_timeout: millis(AUTH_TIMEOUT_MS)?.unwrap_or(Duration::from_millis(3000)),
            http_timeout: millis(HTTP_TIMEOUT_MS)?.unwrap_or(Duration::from_secs(15)),
            query: QueryConfig {
                stale_after: millis(QUERY_STALE_MS)?,
                retry: RetryConfig {
                    max_attempts: retries,
                    ..RetryConfig::default()
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reports_every_missing_key() {
        let err = ClientConfig::from_lookup(lookup(&[(FIREBASE_API_KEY, "k")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec![API_BASE_URL, FIREBASE_PROJECT_ID])
        );
        assert_eq!(
            err.to_string(),
            "missing configuration: COOKBOOK_API_BASE_URL, COOKBOOK_FIREBASE_PROJECT_ID"
        );
    }

    #[test]
    fn applies_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            (API_BASE_URL, "https://api.example.com/v1/"),
            (FIREBASE_API_KEY, "key"),
            (FIREBASE_PROJECT_ID, "cookbook-app"),
        ]))
        .unwrap();

        assert_eq!(config.api_base_url.as_str(), "https://api.example.com/v1/");
        assert_eq!(config.auth_init_timeout, Duration::from_millis(3000));
        assert_eq!(config.http_timeout, Duration::from_secs(15));
        assert_eq!(config.query.stale_after, None);
        assert_eq!(config.query.retry.max_attempts, 0);
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = ClientConfig::from_lookup(lookup(&[
            (API_BASE_URL, "https://api.example.com"),
            (FIREBASE_API_KEY, "key"),
            (FIREBASE_PROJECT_ID, "cookbook-app"),
            (AUTH_TIMEOUT_MS, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: AUTH_TIMEOUT_MS, .. }));
    }

    #[test]
    fn parses_query_tuning() {
        let config = ClientConfig::from_lookup(lookup(&[
            (API_BASE_URL, "http://localhost:8080"),
            (FIREBASE_API_KEY, "key"),
            (FIREBASE_PROJECT_ID, "cookbook-app"),
            (QUERY_STALE_MS, "60000"),
            (QUERY_RETRIES, "2"),
        ]))
        .unwrap();
        assert_eq!(config.query.stale_after, Some(Duration::from_secs(60)));
        assert_eq!(config.query.retry.max_attempts, 2);
    }
}
