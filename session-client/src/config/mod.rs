use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub api: ApiSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApiSettings {
    /// Base URL of the sitebook API (e.g., https://api.sitebook.example).
    pub base_url: String,
    /// Path of the token refresh endpoint, appended to `base_url`.
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Path of the token revocation endpoint, appended to `base_url`.
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    /// Upper bound for any single outgoing HTTP request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Upper bound for one refresh exchange, including waiting on the response.
    #[serde(default = "default_refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,
    /// Refresh before sending when the access token expires within this window.
    /// Disabled when unset.
    #[serde(default)]
    pub refresh_ahead_secs: Option<i64>,
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_refresh_timeout_secs() -> u64 {
    15
}

impl ApiSettings {
    /// Settings for `base_url` with every other field at its default.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: default_refresh_path(),
            logout_path: default_logout_path(),
            request_timeout_secs: default_request_timeout_secs(),
            refresh_timeout_secs: default_refresh_timeout_secs(),
            refresh_ahead_secs: None,
        }
    }

    /// Resolve a request target: absolute URLs pass through, paths are joined
    /// onto `base_url`.
    pub fn url_for(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            target.trim_start_matches('/')
        )
    }

    pub fn refresh_url(&self) -> String {
        self.url_for(&self.refresh_path)
    }

    pub fn logout_url(&self) -> String {
        self.url_for(&self.logout_path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct StorageSettings {
    /// Where tokens are persisted. Tokens live in memory only when unset.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP/gRPC collector endpoint (e.g., http://tempo:4317).
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("Failed to read current dir: {}", e)))?;

    // Running from the workspace root or from inside the crate
    let configuration_directory = if base_path.ends_with("session-client") {
        base_path.join("config")
    } else {
        base_path.join("session-client").join("config")
    };

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")).required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
