//! Composition root: builds and owns every long-lived client service.

use std::sync::Arc;

use cookbook_shared::{AuthError, NetworkError};
use reqwest::Client;

use crate::api_client::ApiClient;
use crate::config::ClientConfig;
use crate::identity::{FirebaseIdentityProvider, IdentityProvider};
use crate::profile::{FirestoreProfileStore, ProfileStore};
use crate::resources::Resources;
use crate::session::{InitializeError, SessionController, SessionHandle};
use crate::storage::FileStorage;
use crate::ui_state::UiState;

#[derive(Clone)]
pub struct AppContext {
    config: ClientConfig,
    session: SessionController,
    resources: Resources,
    ui: UiState,
}

impl AppContext {
    /// Build a context around the given providers.
    pub fn new(
        config: ClientConfig,
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Result<Self, NetworkError> {
        let api = ApiClient::new(config.api_base_url.as_str(), config.http_timeout)?;
        Ok(Self::with_api(config, api, identity, profiles))
    }

    fn with_api(
        config: ClientConfig,
        api: ApiClient,
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        let resources = Resources::new(api, config.query.clone());
        Self {
            session: SessionController::new(identity, profiles),
            resources,
            ui: UiState::new(),
            config,
        }
    }

    /// Build a context backed by Firebase Authentication and Firestore,
    /// persisting the signed-in user in `storage`.
    pub fn firebase(config: ClientConfig, storage: Option<FileStorage>) -> Result<Self, NetworkError> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| NetworkError::Network(e.to_string()))?;

        let api = ApiClient::with_client(http.clone(), config.api_base_url.as_str());
        let identity = Arc::new(FirebaseIdentityProvider::new(
            http.clone(),
            config.firebase.api_key.clone(),
            storage,
        ));
        let profiles = Arc::new(FirestoreProfileStore::new(
            http,
            config.firebase.project_id.clone(),
            identity.clone(),
        ));
        Ok(Self::with_api(config, api, identity, profiles))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    /// Subscribe the session to the identity provider, bounded by the
    /// configured initializing timeout.
    pub fn start(&self) -> Result<SessionHandle, InitializeError> {
        self.session
            .initialize_with_timeout(self.config.auth_init_timeout)
    }

    /// Sign out and drop all cached data of the previous user.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.sign_out().await?;
        self.resources.clear();
        Ok(())
    }

    pub fn shutdown(&self, handle: SessionHandle) {
        handle.cancel();
        tracing::debug!("client shut down");
    }
}
