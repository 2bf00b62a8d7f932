//! Single-flight access-token refresh.
//!
//! The first caller that needs a new access token starts one refresh task
//! and publishes its outcome on a `watch` channel. Every caller that asks
//! while that task is running subscribes to the same channel instead of
//! starting another refresh, so a burst of 401s costs exactly one call to
//! `auth/refresh`. Once the outcome is published the slot is emptied and
//! the next caller starts a fresh refresh.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use super::{decode_data, execute_with_timeout};
use crate::capabilities::{
    HttpError, HttpRequest, HttpTransport, AUTHORIZATION, CONTENT_TYPE, USER_AGENT,
};
use crate::config::EnvConfig;
use crate::session::{clone_secret, LogoutReason, SessionProvider, TokenPair};

pub const REFRESH_PATH: &str = "auth/refresh";

#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    NoRefreshToken,

    #[error("refresh request failed: {0}")]
    Transport(HttpError),

    #[error("refresh rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("refresh response carried no access token")]
    EmptyAccessToken,

    #[error("refresh response could not be decoded: {0}")]
    Decode(String),

    #[error("refresh task ended without an outcome")]
    Aborted,
}

type Outcome = Result<Arc<SecretString>, RefreshError>;
type OutcomeRx = watch::Receiver<Option<Outcome>>;

struct Shared {
    transport: Arc<dyn HttpTransport>,
    session: Arc<dyn SessionProvider>,
    config: Arc<EnvConfig>,
    in_flight: Mutex<Option<OutcomeRx>>,
    refresh_calls: AtomicU64,
    waiting: AtomicUsize,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("refresh_calls", &self.refresh_calls())
            .field("waiting", &self.waiting())
            .finish()
    }
}

/// Decrements the waiter count however the wait ends, cancellation included.
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn SessionProvider>,
        config: Arc<EnvConfig>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                session,
                config,
                in_flight: Mutex::new(None),
                refresh_calls: AtomicU64::new(0),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of refresh calls started since construction.
    pub fn refresh_calls(&self) -> u64 {
        self.shared.refresh_calls.load(Ordering::SeqCst)
    }

    /// Callers currently suspended on the in-flight refresh.
    pub fn waiting(&self) -> usize {
        self.shared.waiting.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        self.shared.slot().is_some()
    }

    /// Returns a fresh access token, joining the in-flight refresh when
    /// there is one and starting it otherwise.
    ///
    /// Fails immediately with [`RefreshError::NoRefreshToken`], without
    /// touching the session, when there is nothing to refresh with.
    pub async fn fresh_token(&self) -> Result<Arc<SecretString>, RefreshError> {
        let Some(refresh_token) = self.shared.session.refresh_token() else {
            return Err(RefreshError::NoRefreshToken);
        };

        let mut outcome = self.join_or_start(refresh_token);

        let _waiting = WaitGuard::enter(&self.shared.waiting);
        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(RefreshError::Aborted))
    }

    fn join_or_start(&self, refresh_token: SecretString) -> OutcomeRx {
        let mut slot = self.shared.slot();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }

        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());
        drop(slot);

        let calls = self.shared.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        info!(refresh_calls = calls, "starting token refresh");

        // Detached so that dropping the caller that started it cannot
        // strand the others.
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let outcome = shared.run(refresh_token).await;
            *shared.slot() = None;
            tx.send_replace(Some(outcome));
        });

        rx
    }
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Option<OutcomeRx>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[instrument(skip_all)]
    async fn run(&self, refresh_token: SecretString) -> Outcome {
        match self.request_tokens(&refresh_token).await {
            Ok(pair) => match pair.normalized_access() {
                Some(access) => {
                    self.session
                        .store_tokens(clone_secret(&access), pair.refresh());
                    info!(rotated = pair.refresh_token.is_some(), "token refresh succeeded");
                    Ok(Arc::new(access))
                }
                None => Err(self.fail(RefreshError::EmptyAccessToken)),
            },
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn request_tokens(
        &self,
        refresh_token: &SecretString,
    ) -> Result<TokenPair, RefreshError> {
        let mut request = HttpRequest::post(REFRESH_PATH)
            .with_json(&serde_json::json!({}))
            .and_then(|r| r.with_header(CONTENT_TYPE, "application/json"))
            .and_then(|r| r.with_header(USER_AGENT, self.config.user_agent()))
            .and_then(|r| {
                r.with_header(
                    AUTHORIZATION,
                    format!("Bearer {}", refresh_token.expose_secret()),
                )
            })
            .map_err(RefreshError::Transport)?;
        request
            .resolve(self.config.base_url())
            .map_err(RefreshError::Transport)?;

        let response = execute_with_timeout(
            self.transport.as_ref(),
            &request,
            self.config.request_timeout(),
        )
        .await
        .map_err(RefreshError::Transport)?;

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status(),
            });
        }

        decode_data(response.body()).map_err(|e| RefreshError::Decode(e.to_string()))
    }

    /// Ends the session once for the whole batch of waiters.
    fn fail(&self, error: RefreshError) -> RefreshError {
        warn!(error = %error, "token refresh failed, ending session");
        self.session.clear_tokens();
        self.session.mark_logged_out(LogoutReason::RefreshFailed);
        self.session.notify_session_expired();
        error
    }
}
