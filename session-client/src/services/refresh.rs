//! Single-flight access token refresh.
//!
//! The first caller to find no refresh running starts one and parks a shared
//! handle to it. Every caller that arrives while the handle is parked awaits
//! that same handle and receives the same outcome. The refresh itself runs in
//! its own task and removes the handle in the same step that settles the
//! outcome, so a caller either joins a flight or starts a new one. It can
//! never start one while another is still settling.

use crate::error::RefreshError;
use crate::models::session::LogoutReason;
use crate::services::auth_api::AuthApi;
use crate::services::session::SessionState;
use futures::future::{BoxFuture, FutureExt, Shared};
use secrecy::SecretString;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub type RefreshOutcome = Result<SecretString, RefreshError>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    InFlight,
}

pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    session: Arc<SessionState>,
    auth_api: Arc<dyn AuthApi>,
    timeout: Duration,
    in_flight: Mutex<Option<SharedRefresh>>,
}

impl RefreshCoordinator {
    pub fn new(session: Arc<SessionState>, auth_api: Arc<dyn AuthApi>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                auth_api,
                timeout,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> RefreshState {
        if self.inner.slot().is_some() {
            RefreshState::InFlight
        } else {
            RefreshState::Idle
        }
    }

    /// Obtain a new access token, joining the refresh already running if any.
    ///
    /// On [`RefreshError::Rejected`] and [`RefreshError::NoRefreshToken`] the
    /// session has been logged out by the time this returns. Transient
    /// failures leave it untouched.
    pub async fn refresh(&self) -> RefreshOutcome {
        let flight = {
            let mut slot = self.inner.slot();
            match slot.as_ref() {
                Some(flight) => {
                    tracing::debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let flight = Inner::start(Arc::clone(&self.inner));
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<SharedRefresh>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the refresh so it completes even if every waiter goes away.
    fn start(inner: Arc<Self>) -> SharedRefresh {
        let task = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let outcome = inner.run().await;
                inner.slot().take();
                outcome
            })
        };

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Token refresh task failed: {}", e);
                    inner.slot().take();
                    Err(RefreshError::transient(format!("refresh task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run(&self) -> RefreshOutcome {
        let Some(refresh_token) = self.session.refresh_token() else {
            tracing::warn!("Access token expired and no refresh token is available");
            self.session.logout(LogoutReason::RefreshUnavailable);
            return Err(RefreshError::NoRefreshToken);
        };

        tracing::debug!("Refreshing access token");
        let result = tokio::time::timeout(self.timeout, self.auth_api.refresh(&refresh_token))
            .await
            .unwrap_or_else(|_| {
                Err(RefreshError::transient(format!(
                    "refresh timed out after {}s",
                    self.timeout.as_secs_f64()
                )))
            });

        match result {
            Ok(grant) => {
                let access_token = self.session.apply_refresh(&refresh_token, grant)?;
                tracing::info!("Access token refreshed");
                Ok(access_token)
            }
            Err(RefreshError::Rejected) => {
                self.session
                    .logout_if_current(&refresh_token, LogoutReason::RefreshRejected);
                Err(RefreshError::Rejected)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, keeping session");
                Err(e)
            }
        }
    }
}
