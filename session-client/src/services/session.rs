//! The authoritative in-memory view of the current session.
//!
//! Every mutation updates the [`TokenStore`] and the published
//! [`SessionSnapshot`] inside the same critical section (the watch channel's
//! write lock), so subscribers never see a status that disagrees with the
//! stored tokens.

use crate::error::{ClaimsError, RefreshError};
use crate::models::session::{
    Identity, LogoutReason, SessionSnapshot, SessionStatus, TokenPair,
};
use crate::services::auth_api::{AuthApi, RefreshGrant};
use crate::services::token_store::{TokenKey, TokenStore};
use crate::utils::jwt::{decode_claims, AccessClaims};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::watch;

pub struct SessionState {
    store: Arc<dyn TokenStore>,
    auth_api: Arc<dyn AuthApi>,
    state: watch::Sender<SessionSnapshot>,
}

impl SessionState {
    pub fn new(store: Arc<dyn TokenStore>, auth_api: Arc<dyn AuthApi>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::uninitialized());
        Self {
            store,
            auth_api,
            state,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    /// Receive every session transition, including teardown after a rejected refresh.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn access_token(&self) -> Option<SecretString> {
        self.store.get(TokenKey::AccessToken)
    }

    pub fn refresh_token(&self) -> Option<SecretString> {
        self.store.get(TokenKey::RefreshToken)
    }

    /// Claims of the stored access token, if it decodes.
    pub fn access_claims(&self) -> Option<AccessClaims> {
        let token = self.access_token()?;
        decode_claims(token.expose_secret()).ok()
    }

    /// Hydrate the session from the token store. Never touches the network.
    ///
    /// A stored access token whose claims do not decode is discarded and the
    /// session becomes anonymous. Calling this again with an unchanged store
    /// gives the same result.
    pub fn restore(&self) {
        let started = self.state.send_if_modified(|snapshot| {
            if snapshot.status == SessionStatus::Restoring {
                return false;
            }
            snapshot.status = SessionStatus::Restoring;
            true
        });
        if !started {
            tracing::debug!("Session restore already running");
            return;
        }

        self.state.send_modify(|snapshot| {
            *snapshot = match self.store.get(TokenKey::AccessToken) {
                None => SessionSnapshot::anonymous(),
                Some(token) => match decode_claims(token.expose_secret()) {
                    Ok(claims) => {
                        tracing::info!(user_id = %claims.user_id, "Session restored");
                        SessionSnapshot::authenticated(claims.identity())
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Stored access token unreadable, clearing session");
                        self.store.clear();
                        SessionSnapshot::anonymous()
                    }
                },
            };
        });
    }

    /// Start a session from tokens issued by a login, OTP or invite flow.
    pub fn login(&self, identity: Identity, tokens: TokenPair) {
        self.state.send_modify(|snapshot| {
            self.write_tokens(tokens);
            tracing::info!(
                user_id = %identity.user_id,
                company_id = ?identity.company_id,
                "User logged in"
            );
            *snapshot = SessionSnapshot::authenticated(identity);
        });
    }

    /// [`login`](Self::login) with the identity decoded from the access token.
    pub fn login_with_tokens(&self, tokens: TokenPair) -> Result<Identity, ClaimsError> {
        let identity = decode_claims(tokens.access_token.expose_secret())?.identity();
        self.login(identity.clone(), tokens);
        Ok(identity)
    }

    /// End the session.
    ///
    /// The server is notified in the background and its answer is ignored.
    /// Tokens are cleared and the session becomes anonymous regardless. A
    /// second call finds nothing to clear and does nothing.
    pub fn logout(&self, reason: LogoutReason) {
        self.end(reason, None);
    }

    /// Log out only if the stored refresh token is still `used`. A session
    /// started while a refresh was running is left alone.
    pub(crate) fn logout_if_current(&self, used: &SecretString, reason: LogoutReason) -> bool {
        self.end(reason, Some(used))
    }

    fn end(&self, reason: LogoutReason, expected: Option<&SecretString>) -> bool {
        let mut revoked = None;

        let changed = self.state.send_if_modified(|snapshot| {
            let refresh_token = self.store.get(TokenKey::RefreshToken);

            if let Some(expected) = expected {
                let still_current = refresh_token
                    .as_ref()
                    .is_some_and(|t| t.expose_secret() == expected.expose_secret());
                if !still_current {
                    return false;
                }
            }

            let has_tokens =
                refresh_token.is_some() || self.store.get(TokenKey::AccessToken).is_some();
            if !has_tokens && snapshot.status == SessionStatus::Anonymous {
                return false;
            }

            self.store.clear();
            revoked = refresh_token;
            *snapshot = SessionSnapshot::anonymous();
            true
        });

        if !changed {
            tracing::debug!(reason = %reason, "No session to end");
            return false;
        }

        tracing::info!(reason = %reason, "Session ended");

        if let Some(refresh_token) = revoked {
            self.notify_logout(refresh_token);
        }
        true
    }

    /// Apply a successful refresh made with `used`.
    ///
    /// Nothing is written if the stored refresh token is no longer `used`:
    /// the session was logged out or replaced while the call was running.
    /// A grant whose access token does not decode is discarded as transient.
    pub(crate) fn apply_refresh(
        &self,
        used: &SecretString,
        grant: RefreshGrant,
    ) -> Result<SecretString, RefreshError> {
        let mut outcome = Err(RefreshError::SessionEnded);

        self.state.send_if_modified(|snapshot| {
            let still_current = self
                .store
                .get(TokenKey::RefreshToken)
                .is_some_and(|t| t.expose_secret() == used.expose_secret());
            if !still_current {
                return false;
            }

            let identity = match decode_claims(grant.access_token.expose_secret()) {
                Ok(claims) => claims.identity(),
                Err(e) => {
                    tracing::warn!(error = %e, "Refreshed access token unreadable, discarding grant");
                    outcome = Err(RefreshError::transient(format!(
                        "unreadable access token in refresh response: {}",
                        e
                    )));
                    return false;
                }
            };

            self.store
                .set(TokenKey::AccessToken, grant.access_token.clone());
            if let Some(rotated) = grant.refresh_token {
                self.store.set(TokenKey::RefreshToken, rotated);
            }
            outcome = Ok(grant.access_token);

            let refreshed = SessionSnapshot::authenticated(identity);
            if *snapshot == refreshed {
                return false;
            }
            *snapshot = refreshed;
            true
        });

        outcome
    }

    fn write_tokens(&self, tokens: TokenPair) {
        self.store.set(TokenKey::AccessToken, tokens.access_token);
        match tokens.refresh_token {
            Some(refresh_token) => self.store.set(TokenKey::RefreshToken, refresh_token),
            // A refresh token from an earlier session must not outlive it
            None => self.store.remove(TokenKey::RefreshToken),
        }
    }

    fn notify_logout(&self, refresh_token: SecretString) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, skipping server-side logout");
            return;
        };

        let auth_api = Arc::clone(&self.auth_api);
        runtime.spawn(async move {
            if let Err(e) = auth_api.revoke(&refresh_token).await {
                tracing::error!("Failed to revoke token during logout: {}", e);
            } else {
                tracing::info!("Token revoked successfully");
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::token_store::MemoryTokenStore;
    use crate::utils::jwt::encode_test_token;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records revocations; refresh is never expected here.
    #[derive(Default)]
    pub(crate) struct RecordingAuthApi {
        pub revocations: AtomicUsize,
    }

    #[async_trait]
    impl AuthApi for RecordingAuthApi {
        async fn refresh(&self, _: &SecretString) -> Result<RefreshGrant, RefreshError> {
            Err(RefreshError::transient("not under test"))
        }

        async fn revoke(&self, _: &SecretString) -> anyhow::Result<()> {
            self.revocations.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("revocation endpoint down"))
        }
    }

    pub(crate) fn token_for(user_id: &str) -> String {
        encode_test_token(&json!({
            "sub": user_id,
            "company_id": "c1",
            "email": format!("{}@example.com", user_id),
        }))
    }

    fn secret(value: &str) -> SecretString {
        SecretString::new(value.to_string())
    }

    fn setup() -> (Arc<MemoryTokenStore>, Arc<RecordingAuthApi>, SessionState) {
        let store = Arc::new(MemoryTokenStore::new());
        let api = Arc::new(RecordingAuthApi::default());
        let session = SessionState::new(store.clone(), api.clone());
        (store, api, session)
    }

    #[test]
    fn test_new_session_is_uninitialized() {
        let (_, _, session) = setup();
        assert_eq!(session.status(), SessionStatus::Uninitialized);
        assert!(session.identity().is_none());
    }

    #[test]
    fn test_restore_with_valid_token() {
        let (store, _, session) = setup();
        store.set(TokenKey::AccessToken, secret(&token_for("u1")));
        store.set(TokenKey::RefreshToken, secret("R1"));

        session.restore();

        assert_eq!(session.status(), SessionStatus::Authenticated);
        let identity = session.identity().unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.company_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_restore_is_idempotent() {
        let (store, _, session) = setup();
        store.set(TokenKey::AccessToken, secret(&token_for("u1")));

        session.restore();
        let first = session.snapshot();
        session.restore();

        assert_eq!(session.snapshot(), first);
    }

    #[test]
    fn test_restore_without_tokens_is_anonymous() {
        let (_, _, session) = setup();
        session.restore();
        assert_eq!(session.status(), SessionStatus::Anonymous);
    }

    #[test]
    fn test_restore_with_undecodable_token_degrades_to_anonymous() {
        let (store, _, session) = setup();
        store.set(TokenKey::AccessToken, secret("header.bm90IGpzb24.signature"));
        store.set(TokenKey::RefreshToken, secret("R1"));

        session.restore();

        assert_eq!(session.status(), SessionStatus::Anonymous);
        assert!(session.identity().is_none());
        assert!(store.get(TokenKey::AccessToken).is_none());
        assert!(store.get(TokenKey::RefreshToken).is_none());
    }

    #[test]
    fn test_login_writes_tokens_and_identity() {
        let (store, _, session) = setup();
        let identity = session
            .login_with_tokens(TokenPair::new(token_for("u2"), Some("R2".to_string())))
            .unwrap();

        assert_eq!(identity.user_id, "u2");
        assert_eq!(session.status(), SessionStatus::Authenticated);
        assert_eq!(
            store
                .get(TokenKey::RefreshToken)
                .map(|t| t.expose_secret().clone())
                .as_deref(),
            Some("R2")
        );
    }

    #[test]
    fn test_login_without_refresh_token_drops_previous_one() {
        let (store, _, session) = setup();
        store.set(TokenKey::RefreshToken, secret("R-old"));

        session
            .login_with_tokens(TokenPair::new(token_for("u2"), None))
            .unwrap();

        assert!(store.get(TokenKey::AccessToken).is_some());
        assert!(store.get(TokenKey::RefreshToken).is_none());
    }

    #[test]
    fn test_login_with_bad_token_is_rejected() {
        let (store, _, session) = setup();
        let result = session.login_with_tokens(TokenPair::new("garbage", None));

        assert!(result.is_err());
        assert!(store.get(TokenKey::AccessToken).is_none());
        assert_eq!(session.status(), SessionStatus::Uninitialized);
    }

    #[tokio::test]
    async fn test_logout_clears_and_is_idempotent() {
        let (store, api, session) = setup();
        session
            .login_with_tokens(TokenPair::new(token_for("u1"), Some("R1".to_string())))
            .unwrap();
        let mut changes = session.subscribe();

        session.logout(LogoutReason::UserRequested);
        session.logout(LogoutReason::UserRequested);

        assert_eq!(session.status(), SessionStatus::Anonymous);
        for key in TokenKey::ALL {
            assert!(store.get(key).is_none());
        }
        assert!(changes.has_changed().unwrap());
        assert!(!changes.borrow_and_update().is_authenticated());

        // Let the background notification run; its failure is ignored
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(api.revocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_logout_without_runtime_still_clears() {
        let (store, api, session) = setup();
        session.login(
            Identity {
                user_id: "u1".to_string(),
                company_id: None,
                display_name: None,
                email: None,
            },
            TokenPair::new(token_for("u1"), Some("R1".to_string())),
        );

        session.logout(LogoutReason::UserRequested);

        assert!(store.get(TokenKey::RefreshToken).is_none());
        assert_eq!(session.status(), SessionStatus::Anonymous);
        assert_eq!(api.revocations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_apply_refresh_keeps_unrotated_refresh_token() {
        let (store, _, session) = setup();
        session
            .login_with_tokens(TokenPair::new(token_for("u1"), Some("R1".to_string())))
            .unwrap();

        let new_access = token_for("u1");
        let applied = session
            .apply_refresh(
                &secret("R1"),
                RefreshGrant {
                    access_token: secret(&new_access),
                    refresh_token: None,
                },
            )
            .unwrap();

        assert_eq!(applied.expose_secret(), &new_access);
        assert_eq!(
            store
                .get(TokenKey::RefreshToken)
                .map(|t| t.expose_secret().clone())
                .as_deref(),
            Some("R1")
        );
    }

    #[test]
    fn test_apply_refresh_after_logout_is_discarded() {
        let (store, _, session) = setup();
        session
            .login_with_tokens(TokenPair::new(token_for("u1"), Some("R1".to_string())))
            .unwrap();
        session.logout(LogoutReason::UserRequested);

        let result = session.apply_refresh(
            &secret("R1"),
            RefreshGrant {
                access_token: secret(&token_for("u1")),
                refresh_token: None,
            },
        );

        assert_eq!(result.unwrap_err(), RefreshError::SessionEnded);
        assert!(store.get(TokenKey::AccessToken).is_none());
        assert_eq!(session.status(), SessionStatus::Anonymous);
    }

    #[test]
    fn test_apply_refresh_discards_unreadable_token() {
        let (store, _, session) = setup();
        let original = token_for("u1");
        session
            .login_with_tokens(TokenPair::new(original.clone(), Some("R1".to_string())))
            .unwrap();
        let before = session.snapshot();

        let result = session.apply_refresh(
            &secret("R1"),
            RefreshGrant {
                access_token: secret("header.bm90IGpzb24.signature"),
                refresh_token: Some(secret("R2")),
            },
        );

        assert!(result.unwrap_err().is_transient());
        assert_eq!(session.snapshot(), before);
        assert_eq!(
            store.get(TokenKey::AccessToken).map(|t| t.expose_secret().clone()),
            Some(original)
        );
        assert_eq!(
            store
                .get(TokenKey::RefreshToken)
                .map(|t| t.expose_secret().clone())
                .as_deref(),
            Some("R1")
        );
    }

    #[test]
    fn test_logout_if_current_spares_newer_session() {
        let (store, _, session) = setup();
        session
            .login_with_tokens(TokenPair::new(token_for("u2"), Some("R2".to_string())))
            .unwrap();

        assert!(!session.logout_if_current(&secret("R1"), LogoutReason::RefreshRejected));
        assert_eq!(session.status(), SessionStatus::Authenticated);
        assert!(store.get(TokenKey::RefreshToken).is_some());

        assert!(session.logout_if_current(&secret("R2"), LogoutReason::RefreshRejected));
        assert_eq!(session.status(), SessionStatus::Anonymous);
    }
}
