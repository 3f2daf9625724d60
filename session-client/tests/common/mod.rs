//! Common test utilities for session-client integration tests.

#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use session_client::config::{ApiSettings, Settings, StorageSettings, TelemetrySettings};
use session_client::models::TokenPair;
use session_client::SessionClient;
use std::path::PathBuf;
use std::sync::Once;
use wiremock::MockServer;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,session_client=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// An unsigned access token for `user_id`. `marker` keeps tokens for the same
/// user distinguishable.
pub fn access_token(user_id: &str, marker: &str) -> String {
    access_token_with(serde_json::json!({
        "sub": user_id,
        "company_id": 42,
        "name": "Site Manager",
        "email": format!("{}@example.com", user_id),
        "jti": marker,
    }))
}

pub fn access_token_with(payload: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, payload)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn settings(server: &MockServer, token_file: Option<PathBuf>) -> Settings {
    let mut api = ApiSettings::new(server.uri());
    api.refresh_timeout_secs = 5;
    api.request_timeout_secs = 5;

    Settings {
        api,
        storage: StorageSettings { token_file },
        telemetry: TelemetrySettings::default(),
    }
}

/// A client holding a logged-in session with the given tokens.
pub fn logged_in_client(
    settings: &Settings,
    access: &str,
    refresh: Option<&str>,
) -> SessionClient {
    init_tracing();

    let session_client =
        SessionClient::from_settings(settings).expect("Failed to build session client");
    session_client
        .session
        .login_with_tokens(TokenPair::new(access, refresh.map(str::to_string)))
        .expect("Test token should decode");
    session_client
}
