//! Server-side sessions.
//!
//! A signed-in browser holds only an opaque id in an HTTP-only cookie; the
//! email and Google tokens stay in [`SessionStore`]. Handlers that need Drive
//! access take an [`AuthSession`] and run their calls through
//! [`AuthSession::execute`], which reads the session's current tokens and
//! writes rotated ones back to the store.
//!
//! A session whose refresh token was rejected keeps existing, in the
//! `RefreshAccessTokenError` state, until the user signs in again or out.
//! Every session ends `max_age` after sign-in; [`spawn_session_pruning`]
//! drops ended ones.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use lifehub_providers::google::{DriveClient, TokenPair};
use lifehub_providers::{ProviderErrorCode, ProviderResult};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::signals::ShutdownSignal;
use crate::state::AppState;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "lifehub_session";

/// Error state of a session whose tokens can no longer be refreshed.
pub const REFRESH_ERROR: &str = "RefreshAccessTokenError";

/// Response header set when a call rotated the session's tokens.
pub const TOKEN_REFRESHED_HEADER: &str = "x-token-refreshed";

/// Default session lifetime.
pub const DEFAULT_SESSION_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// How often ended sessions are dropped.
pub const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// How long a started sign-in may take to come back.
const SIGN_IN_TTL: Duration = Duration::from_secs(10 * 60);

/// A signed-in user.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub email: String,
    pub tokens: TokenPair,
    /// Set to [`REFRESH_ERROR`] once a refresh was rejected.
    pub error: Option<String>,
    pub created: Instant,
}

impl Session {
    pub fn new(email: impl Into<String>, tokens: TokenPair) -> Self {
        Self {
            email: email.into(),
            tokens,
            error: None,
            created: Instant::now(),
        }
    }
}

/// A sign-in waiting for Google's callback, keyed by its `state` parameter.
#[derive(Debug, Clone)]
pub struct PendingSignIn {
    pub verifier: String,
    /// Where to send the browser once signed in.
    pub callback_url: String,
    started: Instant,
}

/// In-memory session table.
#[derive(Debug)]
pub struct SessionStore {
    max_age: Duration,
    sessions: RwLock<HashMap<String, Session>>,
    pending: Mutex<HashMap<String, PendingSignIn>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_MAX_AGE)
    }
}

impl SessionStore {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            sessions: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// How long a session lasts after sign-in.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Stores a new session and returns its id.
    pub async fn create(&self, session: Session) -> String {
        let id = lifehub_providers::google::random_token(32);
        info!(email = %session.email, "session created");
        self.sessions.write().await.insert(id.clone(), session);
        id
    }

    /// Returns the session unless it is unknown or has ended.
    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|session| session.created.elapsed() < self.max_age)
            .cloned()
    }

    /// Replaces a session's tokens and clears its error state.
    ///
    /// Returns false when the session is gone (signed out meanwhile).
    pub async fn store_tokens(&self, id: &str, tokens: TokenPair) -> bool {
        match self.sessions.write().await.get_mut(id) {
            Some(session) => {
                session.tokens = tokens;
                session.error = None;
                debug!(email = %session.email, "session tokens updated");
                true
            }
            None => false,
        }
    }

    /// Puts a session in the `RefreshAccessTokenError` state, unless its
    /// refresh token changed since `failed_refresh_token` was read.
    ///
    /// Returns whether the session was marked.
    pub async fn mark_refresh_failed(&self, id: &str, failed_refresh_token: &str) -> bool {
        match self.sessions.write().await.get_mut(id) {
            Some(session) if session.tokens.refresh_token == failed_refresh_token => {
                warn!(email = %session.email, "session refresh token rejected");
                session.error = Some(REFRESH_ERROR.to_string());
                true
            }
            Some(session) => {
                debug!(email = %session.email, "ignoring failure of a replaced refresh token");
                false
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops ended sessions and abandoned sign-ins. Returns how many
    /// sessions went.
    pub async fn prune_expired(&self) -> usize {
        self.pending
            .lock()
            .await
            .retain(|_, p| p.started.elapsed() < SIGN_IN_TTL);

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.created.elapsed() < self.max_age);
        let pruned = before - sessions.len();
        if pruned > 0 {
            debug!(pruned, remaining = sessions.len(), "pruned ended sessions");
        }
        pruned
    }

    /// Remembers a started sign-in until its callback arrives.
    pub async fn begin_sign_in(&self, state: String, verifier: String, callback_url: String) {
        let mut pending = self.pending.lock().await;
        pending.retain(|_, p| p.started.elapsed() < SIGN_IN_TTL);
        pending.insert(
            state,
            PendingSignIn {
                verifier,
                callback_url,
                started: Instant::now(),
            },
        );
    }

    /// Takes the sign-in started with `state`, if it is known and recent.
    pub async fn finish_sign_in(&self, state: &str) -> Option<PendingSignIn> {
        self.pending
            .lock()
            .await
            .remove(state)
            .filter(|p| p.started.elapsed() < SIGN_IN_TTL)
    }
}

/// Prunes ended sessions every `every` until `shutdown` fires.
pub fn spawn_session_pruning(
    sessions: Arc<SessionStore>,
    every: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stop = shutdown.wait();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!("session pruning stopped");
                    break;
                }
                _ = ticker.tick() => {
                    sessions.prune_expired().await;
                }
            }
        }
    })
}

/// Whether `email` may sign in. An empty list allows everyone.
pub fn is_allowed(email: &str, allowed: &[String]) -> bool {
    allowed.is_empty()
        || allowed
            .iter()
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(email.trim()))
}

/// Keeps post-sign-in redirects on this site.
pub fn safe_callback_url(raw: Option<&str>) -> String {
    match raw {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.contains('\\') => {
            url.to_string()
        }
        _ => "/".to_string(),
    }
}

/// Reads the session id from the request cookies.
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

/// Loads a session, refreshing its access token first when it expires
/// within the configured margin.
///
/// A rejected refresh token puts the session in the error state. Other
/// refresh failures (timeouts, Google outages) leave it unchanged.
pub async fn load_session(state: &AppState, id: &str) -> Option<Session> {
    let mut session = state.sessions.get(id).await?;
    if session.error.is_some() {
        return Some(session);
    }

    let margin = chrono::Duration::from_std(state.config.google.refresh_margin())
        .unwrap_or_else(|_| chrono::Duration::minutes(5));
    if !session.tokens.expires_within(margin, Utc::now()) {
        return Some(session);
    }

    let refreshed = state
        .google
        .refresher
        .refresh(&session.tokens.refresh_token)
        .await;
    match refreshed {
        Ok(refreshed) => {
            session.tokens = session.tokens.apply(refreshed, Utc::now());
            state.sessions.store_tokens(id, session.tokens.clone()).await;
        }
        Err(e) if e.code() == ProviderErrorCode::RefreshFailed => {
            debug!(error = %e, "session refresh rejected");
            if !state
                .sessions
                .mark_refresh_failed(id, &session.tokens.refresh_token)
                .await
            {
                // Another request rotated the tokens meanwhile.
                return state.sessions.get(id).await;
            }
            session.error = Some(REFRESH_ERROR.to_string());
        }
        Err(e) => {
            warn!(error = %e, email = %session.email, "session refresh failed, keeping current tokens");
        }
    }
    Some(session)
}

/// A Drive call's result and whether it rotated the session's tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveOutcome<T> {
    pub value: T,
    pub rotated: bool,
}

/// Extractor for requests from a signed-in, non-expired session.
///
/// Rejects with 401 `Unauthorized` without a valid session cookie, and with
/// 401 `Token expired, please sign in again` for a session in the error state.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    /// The session as it was when the request arrived.
    pub session: Session,
}

impl AuthSession {
    /// Runs a Drive operation through the token-refreshing client and
    /// propagates the outcome to the session store.
    ///
    /// The tokens are read from the store at call time, so a rotation made
    /// by another request since extraction is picked up.
    pub async fn execute<T, F, Fut>(
        &self,
        state: &AppState,
        operation: F,
    ) -> ServerResult<DriveOutcome<T>>
    where
        F: Fn(DriveClient) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let current = state
            .sessions
            .get(&self.id)
            .await
            .ok_or(ServerError::Unauthorized)?;
        if current.error.is_some() {
            return Err(ServerError::SessionExpired);
        }
        let tokens = current.tokens;

        match state.google.api.execute(&tokens, operation).await {
            Ok(outcome) => {
                if outcome.rotated {
                    state.sessions.store_tokens(&self.id, outcome.tokens).await;
                }
                Ok(DriveOutcome {
                    value: outcome.result,
                    rotated: outcome.rotated,
                })
            }
            Err(e) => {
                let err = ServerError::from(e);
                if err.requires_reauth() {
                    state
                        .sessions
                        .mark_refresh_failed(&self.id, &tokens.refresh_token)
                        .await;
                }
                Err(err)
            }
        }
    }
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = session_id(&parts.headers).ok_or(ServerError::Unauthorized)?;
        let session = load_session(state, &id)
            .await
            .ok_or(ServerError::Unauthorized)?;
        if session.error.is_some() {
            return Err(ServerError::SessionExpired);
        }
        Ok(Self { id, session })
    }
}
