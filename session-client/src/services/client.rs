//! Outbound API requests with bearer auth and one retry after a token refresh.

use crate::config::ApiSettings;
use crate::error::{ClientError, RefreshError};
use crate::models::request::{build_form, RequestBody, RequestOptions};
use crate::services::auth_api::is_auth_failure;
use crate::services::refresh::RefreshCoordinator;
use crate::services::session::SessionState;
use client_core::observability::TracedClientExt;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

pub struct AuthenticatedClient {
    client: Client,
    settings: ApiSettings,
    session: Arc<SessionState>,
    refresh: Arc<RefreshCoordinator>,
}

impl AuthenticatedClient {
    pub fn new(
        client: Client,
        settings: ApiSettings,
        session: Arc<SessionState>,
        refresh: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            client,
            settings,
            session,
            refresh,
        }
    }

    /// Send `options` to `target`, a path under the API base URL or an
    /// absolute URL.
    ///
    /// A 401 or 422 response leads to one retry. If another request already
    /// replaced the rejected token, the retry uses the stored token. Otherwise
    /// the token is refreshed first. The retry's response is returned as is,
    /// even if it is another 401/422. Every other response, error statuses
    /// included, is returned unchanged.
    pub async fn request(
        &self,
        target: &str,
        options: RequestOptions,
    ) -> Result<Response, ClientError> {
        let url = self.settings.url_for(target);
        let mut access_token = self.session.access_token().ok_or(ClientError::NoSession)?;
        let mut refreshed = false;

        if self.expires_soon() {
            tracing::debug!(url = %url, "Access token close to expiry, refreshing before send");
            access_token = self.refresh_ahead(access_token).await?;
            refreshed = true;
        }

        let response = self.send(&url, &options, &access_token).await?;
        if refreshed || !is_auth_failure(response.status()) {
            return Ok(response);
        }

        let current = self.session.access_token().ok_or(ClientError::NoSession)?;
        let access_token = if current.expose_secret() != access_token.expose_secret() {
            tracing::debug!(url = %url, "Access token replaced while in flight, retrying");
            current
        } else {
            tracing::info!(
                url = %url,
                status = %response.status(),
                "Access token not accepted, refreshing"
            );
            self.refresh.refresh().await?
        };

        let retry = self.send(&url, &options, &access_token).await?;
        if is_auth_failure(retry.status()) {
            tracing::warn!(
                url = %url,
                status = %retry.status(),
                "Request still unauthorized after refresh"
            );
        }
        Ok(retry)
    }

    /// Refresh a token that has not expired yet. If the refresh cannot be
    /// made right now the still-valid token is used as is.
    async fn refresh_ahead(&self, access_token: SecretString) -> Result<SecretString, ClientError> {
        match self.refresh.refresh().await {
            Ok(refreshed) => Ok(refreshed),
            Err(e @ (RefreshError::Transient { .. } | RefreshError::NoRefreshToken)) => {
                tracing::warn!(error = %e, "Early refresh failed, sending with current token");
                // A missing refresh token ends the session
                if self.session.access_token().is_none() {
                    return Err(ClientError::NoSession);
                }
                Ok(access_token)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn expires_soon(&self) -> bool {
        let Some(window) = self.settings.refresh_ahead_secs else {
            return false;
        };
        if self.session.refresh_token().is_none() {
            return false;
        }
        self.session
            .access_claims()
            .is_some_and(|claims| claims.expires_within(window, chrono::Utc::now().timestamp()))
    }

    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        access_token: &SecretString,
    ) -> Result<Response, ClientError> {
        let mut headers = options.headers.clone();
        headers.remove(AUTHORIZATION);

        let mut request = self
            .client
            .traced_request(options.method.clone(), url)
            .headers(headers)
            .bearer_auth(access_token.expose_secret());

        request = match &options.body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => {
                let body = serde_json::to_vec(value)
                    .map_err(|e| ClientError::InvalidRequest(format!("JSON body: {}", e)))?;
                if !options.headers.contains_key(CONTENT_TYPE) {
                    request = request
                        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                request.body(body)
            }
            RequestBody::Bytes(bytes) => request.body(bytes.clone()),
            RequestBody::Multipart(parts) => {
                let form = build_form(parts)
                    .map_err(|e| ClientError::InvalidRequest(format!("multipart body: {}", e)))?;
                request.multipart(form)
            }
        };

        request.send().await.map_err(|e| {
            tracing::error!("Request to {} failed: {}", url, e);
            ClientError::Http(e)
        })
    }
}
