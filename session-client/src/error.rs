//! Error types for the session client.

use thiserror::Error;

/// Outcome of a failed refresh, shared by every caller that awaited it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    /// The server rejected the refresh token (401/422).
    ///
    /// The session has already been logged out when this is returned.
    #[error("Refresh token rejected")]
    Rejected,

    /// No refresh token is stored, so the session cannot be renewed.
    ///
    /// The session has already been logged out when this is returned.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The refresh call failed for network or server reasons.
    ///
    /// The session is left intact so the next request can try again.
    #[error("Refresh failed: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<u64>,
    },

    /// The session was logged out or replaced while the refresh was running.
    /// Its result was discarded.
    #[error("Session ended during refresh")]
    SessionEnded,
}

impl RefreshError {
    pub fn transient(reason: impl Into<String>) -> Self {
        RefreshError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// Whether the session survives this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, RefreshError::Transient { .. })
    }
}

/// Errors surfaced by [`crate::services::client::AuthenticatedClient::request`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// No access token exists; log in first.
    #[error("No active session")]
    NoSession,

    /// The refresh token was rejected or missing and the session was torn down.
    /// The user has to authenticate again.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The token could not be refreshed right now. Re-invoking the action may
    /// succeed.
    #[error("Token refresh unavailable: {reason}")]
    TransientRefresh {
        reason: String,
        retry_after: Option<u64>,
    },

    /// The request body could not be assembled.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transport failure of the caller's own request.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<RefreshError> for ClientError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Transient {
                reason,
                retry_after,
            } => ClientError::TransientRefresh {
                reason,
                retry_after,
            },
            RefreshError::Rejected | RefreshError::NoRefreshToken | RefreshError::SessionEnded => {
                ClientError::AuthenticationFailed
            }
        }
    }
}

/// Failure to decode the claims embedded in an access token.
#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("Invalid token format: expected 3 segments, found {0}")]
    Malformed(usize),

    #[error("Failed to decode token payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to parse token claims: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of the durable side of a token store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
