//! Firebase Authentication over the Identity Toolkit REST API.
//!
//! The signed-in user is persisted through [`FileStorage`] and restored when
//! the provider is constructed, so a restart delivers the restored identity
//! to the first subscriber.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cookbook_shared::{AuthError, AuthErrorCode};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    AccessTokenSource, Identity, IdentityId, IdentityProvider, ListenerSet, SessionListener,
    SignUpProfile, Subscription,
};
use crate::storage::FileStorage;

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";
const STORAGE_KEY: &str = "auth_session";

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Credentials of the signed-in user, as persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Credentials {
    identity: Identity,
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl Credentials {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) <= now
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn expires_at(expires_in: Option<&str>) -> DateTime<Utc> {
    let secs = expires_in.and_then(|s| s.parse::<i64>().ok()).unwrap_or(3600);
    Utc::now() + Duration::seconds(secs)
}

/// Map an Identity Toolkit error message (e.g. `WEAK_PASSWORD : Password
/// should be at least 6 characters`) onto an [`AuthError`].
pub fn map_provider_error(message: &str) -> AuthError {
    let native = message.split(':').next().unwrap_or(message).trim();
    let code = match native {
        "INVALID_LOGIN_CREDENTIALS" | "INVALID_IDP_RESPONSE" => AuthErrorCode::InvalidCredential,
        "EMAIL_NOT_FOUND" | "USER_DISABLED" | "USER_NOT_FOUND" => AuthErrorCode::UserNotFound,
        "INVALID_PASSWORD" => AuthErrorCode::WrongPassword,
        "INVALID_EMAIL" | "MISSING_EMAIL" => AuthErrorCode::InvalidEmail,
        "EMAIL_EXISTS" => AuthErrorCode::EmailAlreadyInUse,
        "WEAK_PASSWORD" | "MISSING_PASSWORD" => AuthErrorCode::WeakPassword,
        other => AuthErrorCode::Unknown(other.to_lowercase().replace('_', "-")),
    };
    AuthError::new(code, message)
}

pub struct FirebaseIdentityProvider {
    client: Client,
    api_key: String,
    identity_toolkit_url: String,
    secure_token_url: String,
    storage: Option<FileStorage>,
    credentials: Mutex<Option<Credentials>>,
    listeners: ListenerSet,
}

impl FirebaseIdentityProvider {
    /// Create a provider, restoring any session persisted in `storage`.
    pub fn new(client: Client, api_key: impl Into<String>, storage: Option<FileStorage>) -> Self {
        let restored = storage
            .as_ref()
            .and_then(|s| s.load::<Credentials>(STORAGE_KEY));
        if let Some(creds) = &restored {
            tracing::debug!("restored persisted session for {}", creds.identity.id);
        }

        Self {
            client,
            api_key: api_key.into(),
            identity_toolkit_url: IDENTITY_TOOLKIT_URL.to_string(),
            secure_token_url: SECURE_TOKEN_URL.to_string(),
            storage,
            credentials: Mutex::new(restored),
            listeners: ListenerSet::new(),
        }
    }

    /// Point the provider at different service roots (emulators, test fixtures).
    pub fn with_endpoints(
        mut self,
        identity_toolkit_url: impl Into<String>,
        secure_token_url: impl Into<String>,
    ) -> Self {
        self.identity_toolkit_url = identity_toolkit_url.into();
        self.secure_token_url = secure_token_url.into();
        self
    }

    fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_credentials(&self, creds: Option<Credentials>) {
        *self.credentials.lock().unwrap_or_else(PoisonError::into_inner) = creds;
    }

    fn persist(&self, creds: &Credentials) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save(STORAGE_KEY, creds) {
                tracing::warn!("failed to persist session: {e}");
            }
        }
    }

    async fn post_account<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        method: &str,
        body: &TReq,
    ) -> Result<TRes, AuthError> {
        let url = format!(
            "{}/accounts:{method}?key={}",
            self.identity_toolkit_url.trim_end_matches('/'),
            urlencoding::encode(&self.api_key)
        );

        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::network(e.to_string()))?;

        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| AuthError::network(format!("failed to read body: {e}")))?;

        if !is_success {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(map_provider_error(&message));
        }

        serde_json::from_str(&text)
            .map_err(|e| AuthError::new(AuthErrorCode::Unknown("bad-response".into()), e.to_string()))
    }

    fn accept(&self, resp: AccountResponse, email: &str) -> Identity {
        let identity = Identity {
            id: IdentityId(resp.local_id),
            email: resp.email.or_else(|| Some(email.to_string())),
            display_name: resp.display_name.filter(|n| !n.is_empty()),
        };
        let creds = Credentials {
            identity: identity.clone(),
            id_token: resp.id_token,
            refresh_token: resp.refresh_token,
            expires_at: expires_at(resp.expires_in.as_deref()),
        };
        self.persist(&creds);
        self.store_credentials(Some(creds));
        identity
    }

    fn apply_update(&self, update: UpdateResponse, requested_name: &str) -> Option<Identity> {
        let updated = {
            let mut guard = self.credentials.lock().unwrap_or_else(PoisonError::into_inner);
            let creds = guard.as_mut()?;
            creds.identity.display_name = update
                .display_name
                .filter(|n| !n.is_empty())
                .or_else(|| Some(requested_name.to_string()));
            if let (Some(id_token), Some(refresh_token)) = (update.id_token, update.refresh_token) {
                creds.id_token = id_token;
                creds.refresh_token = refresh_token;
                creds.expires_at = expires_at(update.expires_in.as_deref());
            }
            creds.clone()
        };
        self.persist(&updated);
        Some(updated.identity)
    }

    async fn refresh(&self, creds: Credentials) -> Option<String> {
        let url = format!(
            "{}/token?key={}",
            self.secure_token_url.trim_end_matches('/'),
            urlencoding::encode(&self.api_key)
        );
        let resp = match self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", creds.refresh_token.as_str()),
            ])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("token refresh failed: {e}");
                return None;
            }
        };

        if resp.status().is_client_error() {
            // Refresh token revoked or user disabled: the session is gone.
            tracing::warn!(
                "refresh token rejected with HTTP {}, signing out",
                resp.status()
            );
            if let Some(storage) = &self.storage {
                if let Err(e) = storage.remove(STORAGE_KEY) {
                    tracing::warn!("failed to remove persisted session: {e}");
                }
            }
            self.store_credentials(None);
            self.listeners.notify(None);
            return None;
        }

        let refreshed = match resp.json::<RefreshResponse>().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("unreadable token refresh response: {e}");
                return None;
            }
        };

        let updated = Credentials {
            id_token: refreshed.id_token.clone(),
            refresh_token: refreshed.refresh_token,
            expires_at: expires_at(refreshed.expires_in.as_deref()),
            ..creds
        };
        self.persist(&updated);
        self.store_credentials(Some(updated));
        Some(refreshed.id_token)
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    fn subscribe(&self, listener: Arc<dyn SessionListener>) -> Subscription {
        self.listeners.add(listener, self.current())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let resp: AccountResponse = self
            .post_account(
                "signInWithPassword",
                &serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        let identity = self.accept(resp, email);
        tracing::info!("signed in as {}", identity.id);
        self.listeners.notify(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: SignUpProfile,
    ) -> Result<Identity, AuthError> {
        let resp: AccountResponse = self
            .post_account(
                "signUp",
                &serde_json::json!({
                    "email": email,
                    "password": password,
                    "returnSecureToken": true,
                }),
            )
            .await?;

        // The account exists from here on, so hold on to its credentials
        // even if setting the display name fails.
        let id_token = resp.id_token.clone();
        let mut identity = self.accept(resp, email);

        let name = profile.display_name.trim();
        if !name.is_empty() {
            let update = self
                .post_account::<_, UpdateResponse>(
                    "update",
                    &serde_json::json!({
                        "idToken": id_token,
                        "displayName": name,
                        "returnSecureToken": true,
                    }),
                )
                .await;
            match update {
                Ok(update) => {
                    if let Some(updated) = self.apply_update(update, name) {
                        identity = updated;
                    }
                }
                Err(e) => tracing::warn!(user = %identity.id, "failed to set display name: {e}"),
            }
        }

        tracing::info!("registered {}", identity.id);
        self.listeners.notify(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(storage) = &self.storage {
            storage
                .remove(STORAGE_KEY)
                .map_err(|e| AuthError::new(AuthErrorCode::Storage, e.to_string()))?;
        }
        self.store_credentials(None);
        self.listeners.notify(None);
        Ok(())
    }

    fn current(&self) -> Option<Identity> {
        self.credentials().map(|c| c.identity)
    }
}

#[async_trait]
impl AccessTokenSource for FirebaseIdentityProvider {
    async fn access_token(&self) -> Option<String> {
        let creds = self.credentials()?;
        if creds.is_expired(Utc::now()) {
            return self.refresh(creds).await;
        }
        Some(creds.id_token)
    }
}
