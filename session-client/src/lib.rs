pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use config::Settings;
use services::auth_api::{AuthApi, HttpAuthApi};
use services::client::AuthenticatedClient;
use services::refresh::RefreshCoordinator;
use services::session::SessionState;
use services::token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
use std::sync::Arc;

/// Everything a caller needs to hold one session against the API.
#[derive(Clone)]
pub struct SessionClient {
    pub session: Arc<SessionState>,
    pub refresh: Arc<RefreshCoordinator>,
    pub client: Arc<AuthenticatedClient>,
}

impl SessionClient {
    /// Wire up a session from configuration. The session starts
    /// uninitialized; call [`SessionState::restore`] to load stored tokens.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let store: Arc<dyn TokenStore> = match &settings.storage.token_file {
            Some(path) => {
                tracing::info!(path = %path.display(), "Using file token store");
                Arc::new(FileTokenStore::open(path))
            }
            None => {
                tracing::info!("Using in-memory token store");
                Arc::new(MemoryTokenStore::new())
            }
        };

        let http = reqwest::Client::builder()
            .timeout(settings.api.request_timeout())
            .build()
            .map_err(|e| {
                tracing::error!("Failed to build HTTP client: {}", e);
                anyhow::anyhow!("HTTP client error: {}", e)
            })?;

        let auth_api: Arc<dyn AuthApi> =
            Arc::new(HttpAuthApi::new(http.clone(), settings.api.clone()));

        Ok(Self::new(store, auth_api, http, settings))
    }

    /// Wire up a session around an explicit store and auth API.
    pub fn new(
        store: Arc<dyn TokenStore>,
        auth_api: Arc<dyn AuthApi>,
        http: reqwest::Client,
        settings: &Settings,
    ) -> Self {
        let session = Arc::new(SessionState::new(store, Arc::clone(&auth_api)));
        let refresh = Arc::new(RefreshCoordinator::new(
            Arc::clone(&session),
            auth_api,
            settings.api.refresh_timeout(),
        ));
        let client = Arc::new(AuthenticatedClient::new(
            http,
            settings.api.clone(),
            Arc::clone(&session),
            Arc::clone(&refresh),
        ));

        Self {
            session,
            refresh,
            client,
        }
    }
}
