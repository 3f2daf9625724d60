//! Durable key/value storage for the session's tokens.

use crate::error::StoreError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Stable keys under which tokens are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKey {
    AccessToken,
    RefreshToken,
}

impl TokenKey {
    pub const ALL: [TokenKey; 2] = [TokenKey::AccessToken, TokenKey::RefreshToken];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKey::AccessToken => "accessToken",
            TokenKey::RefreshToken => "refreshToken",
        }
    }
}

impl std::fmt::Display for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous token persistence.
///
/// Implementations never fail to the caller: if the durable medium is
/// unavailable the write is dropped and the in-memory copy stays authoritative
/// for the life of the process.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: TokenKey) -> Option<SecretString>;

    fn set(&self, key: TokenKey, value: SecretString);

    fn remove(&self, key: TokenKey);

    /// Remove every session entry. Readers never observe a partially cleared store.
    fn clear(&self);
}

/// Process-local store. Tokens are lost on restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: RwLock<HashMap<TokenKey, SecretString>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: TokenKey) -> Option<SecretString> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&key).cloned()
    }

    fn set(&self, key: TokenKey, value: SecretString) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, value);
    }

    fn remove(&self, key: TokenKey) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&key);
    }

    fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}

/// On-disk layout of [`FileTokenStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedTokens {
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

/// Store backed by a JSON file, mirrored in memory.
///
/// Each write rewrites the whole file through a temporary sibling and a
/// rename. On Unix the file is created with 0600 permissions.
pub struct FileTokenStore {
    path: PathBuf,
    entries: RwLock<HashMap<TokenKey, SecretString>>,
}

impl FileTokenStore {
    /// Open the store at `path`, loading any tokens already persisted there.
    ///
    /// A missing or unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable token file");
                HashMap::new()
            }
        };

        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<TokenKey, SecretString>, StoreError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        let persisted: PersistedTokens = serde_json::from_str(&contents)?;

        let mut entries = HashMap::new();
        if let Some(token) = persisted.access_token {
            entries.insert(TokenKey::AccessToken, SecretString::new(token));
        }
        if let Some(token) = persisted.refresh_token {
            entries.insert(TokenKey::RefreshToken, SecretString::new(token));
        }
        Ok(entries)
    }

    fn persist(&self, entries: &HashMap<TokenKey, SecretString>) -> Result<(), StoreError> {
        let persisted = PersistedTokens {
            access_token: entries
                .get(&TokenKey::AccessToken)
                .map(|t| t.expose_secret().clone()),
            refresh_token: entries
                .get(&TokenKey::RefreshToken)
                .map(|t| t.expose_secret().clone()),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&persisted)?;
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn remove_file(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: TokenKey) -> Option<SecretString> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&key).cloned()
    }

    fn set(&self, key: TokenKey, value: SecretString) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, value);

        if let Err(e) = self.persist(&entries) {
            tracing::warn!(
                path = %self.path.display(),
                key = %key,
                error = %e,
                "Token write not persisted, keeping in-memory copy"
            );
        }
    }

    fn remove(&self, key: TokenKey) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.remove(&key).is_none() {
            return;
        }

        let persisted = if entries.is_empty() {
            self.remove_file()
        } else {
            self.persist(&entries)
        };
        if let Err(e) = persisted {
            tracing::warn!(path = %self.path.display(), key = %key, error = %e, "Token removal not persisted");
        }
    }

    fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();

        if let Err(e) = self.remove_file() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove token file");
        }
    }
}
