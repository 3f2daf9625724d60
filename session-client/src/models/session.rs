use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Who the current session belongs to, as decoded from the access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub company_id: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    /// Name to show in the UI, falling back to the email's local part.
    pub fn name(&self) -> String {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or("User")
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Nothing has been read from the token store yet.
    Uninitialized,
    /// Startup hydration from the token store is running.
    Restoring,
    Authenticated,
    Anonymous,
}

/// Point-in-time view of the session, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub identity: Option<Identity>,
}

impl SessionSnapshot {
    pub fn uninitialized() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            identity: None,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            status: SessionStatus::Anonymous,
            identity: None,
        }
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            identity: Some(identity),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

/// Freshly issued credentials handed to `login`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: SecretString,
    /// Not every flow issues one; without it the session cannot be renewed.
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            refresh_token: refresh_token.map(SecretString::new),
        }
    }
}

/// Why a session ended. Logged with the teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    RefreshRejected,
    RefreshUnavailable,
}

impl std::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            LogoutReason::UserRequested => "user_requested",
            LogoutReason::RefreshRejected => "refresh_rejected",
            LogoutReason::RefreshUnavailable => "refresh_unavailable",
        };
        f.write_str(reason)
    }
}
