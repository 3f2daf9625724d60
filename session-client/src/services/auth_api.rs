//! Calls to the API's token endpoints.

use crate::config::ApiSettings;
use crate::error::RefreshError;
use async_trait::async_trait;
use client_core::observability::TracedClientExt;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Seconds to wait after a 429 when the server sends no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Request body for the refresh and logout endpoints.
#[derive(Debug, Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
}

/// Response from the refresh endpoint.
#[derive(Debug, Deserialize)]
pub struct RefreshGrant {
    pub access_token: SecretString,
    /// Present only when the server rotates refresh tokens.
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
}

/// True for the statuses this API uses for an expired or malformed token.
pub fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::UNPROCESSABLE_ENTITY
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<RefreshGrant, RefreshError>;

    /// Tell the server a refresh token is no longer in use.
    async fn revoke(&self, refresh_token: &SecretString) -> anyhow::Result<()>;
}

pub struct HttpAuthApi {
    client: Client,
    settings: ApiSettings,
}

impl HttpAuthApi {
    pub fn new(client: Client, settings: ApiSettings) -> Self {
        Self { client, settings }
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<RefreshGrant, RefreshError> {
        let url = self.settings.refresh_url();

        let response = self
            .client
            .traced_post(&url)
            .json(&RefreshTokenRequest {
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send refresh request to {}: {}", url, e);
                RefreshError::transient(format!("HTTP request failed: {}", e))
            })?;

        let status = response.status();

        if is_auth_failure(status) {
            tracing::warn!(status = %status, "Refresh token rejected");
            return Err(RefreshError::Rejected);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(RefreshError::Transient {
                reason: "rate limited".to_string(),
                retry_after: Some(retry_after),
            });
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read error body)".to_string());
            return Err(RefreshError::transient(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        response.json::<RefreshGrant>().await.map_err(|e| {
            tracing::error!("Malformed refresh response from {}: {}", url, e);
            RefreshError::transient(format!("malformed refresh response: {}", e))
        })
    }

    async fn revoke(&self, refresh_token: &SecretString) -> anyhow::Result<()> {
        let url = self.settings.logout_url();

        let response = self
            .client
            .traced_post(&url)
            .json(&RefreshTokenRequest {
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        tracing::debug!(status = %response.status(), "Logout notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_statuses() {
        assert!(is_auth_failure(StatusCode::UNAUTHORIZED));
        assert!(is_auth_failure(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!is_auth_failure(StatusCode::FORBIDDEN));
        assert!(!is_auth_failure(StatusCode::NOT_FOUND));
        assert!(!is_auth_failure(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_grant_without_rotation() {
        let grant: RefreshGrant = serde_json::from_str(r#"{"access_token": "A2"}"#).unwrap();

        assert_eq!(grant.access_token.expose_secret(), "A2");
        assert!(grant.refresh_token.is_none());
    }

    #[test]
    fn test_grant_with_rotation() {
        let grant: RefreshGrant =
            serde_json::from_str(r#"{"access_token": "A2", "refresh_token": "R2"}"#).unwrap();

        assert_eq!(
            grant.refresh_token.map(|t| t.expose_secret().clone()),
            Some("R2".to_string())
        );
    }
}
