//! Token-refreshing wrapper around Drive operations.
//!
//! [`TokenRefreshingClient::execute`] takes the caller's [`TokenPair`] and an
//! operation, and:
//!
//! 1. refreshes the access token (always, or only near expiry, depending on
//!    the [`RefreshPolicy`]); a failed refresh ends the call before the
//!    operation runs
//! 2. runs the operation with a handle built from the current access token
//! 3. on a rejected token (HTTP 401), refreshes once more and retries once;
//!    a second rejection ends the call with `RetryExhausted`
//! 4. returns the result with the tokens that made the successful attempt
//!
//! Every other error is returned as is, without a retry. The wrapper never
//! stores tokens; callers persist [`OperationOutcome::tokens`] when
//! [`OperationOutcome::rotated`] is set.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::provider::TokenRefresher;

use super::drive::DriveClient;
use super::tokens::TokenPair;

/// Default margin for [`RefreshPolicy::WhenExpiring`].
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// When to refresh before running an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Refresh before every operation.
    #[default]
    Always,
    /// Refresh only when the token expires within `margin`, or when its
    /// expiry is unknown.
    WhenExpiring { margin: Duration },
}

impl RefreshPolicy {
    /// `WhenExpiring` with the default five minute margin.
    pub fn when_expiring() -> Self {
        Self::WhenExpiring {
            margin: DEFAULT_EXPIRY_MARGIN,
        }
    }

    fn should_refresh(&self, tokens: &TokenPair) -> bool {
        match self {
            Self::Always => true,
            Self::WhenExpiring { margin } => match tokens.expires_at {
                None => true,
                Some(_) => {
                    let margin = chrono::Duration::from_std(*margin)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    tokens.expires_within(margin, Utc::now())
                }
            },
        }
    }
}

/// The result of a wrapped operation and the tokens to use next.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome<T> {
    pub result: T,
    /// Tokens used by the successful attempt.
    pub tokens: TokenPair,
    /// True when `tokens` differ from the pair passed in.
    pub rotated: bool,
}

/// Runs Drive operations with refresh-before-use and one auth retry.
#[derive(Clone)]
pub struct TokenRefreshingClient {
    refresher: Arc<dyn TokenRefresher>,
    drive: DriveClient,
    policy: RefreshPolicy,
}

impl std::fmt::Debug for TokenRefreshingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshingClient")
            .field("drive", &self.drive)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TokenRefreshingClient {
    /// Creates a wrapper; `drive` is the unauthenticated handle template.
    pub fn new(refresher: Arc<dyn TokenRefresher>, drive: DriveClient, policy: RefreshPolicy) -> Self {
        Self {
            refresher,
            drive,
            policy,
        }
    }

    /// Runs `operation`, refreshing tokens before use and once on a 401.
    ///
    /// # Errors
    ///
    /// - `RefreshFailed` when the token endpoint rejects the refresh token;
    ///   the operation is not attempted
    /// - `RetryExhausted` when the operation is rejected again after the retry
    /// - a network error when the refresh times out
    /// - any other operation error, unchanged
    pub async fn execute<T, F, Fut>(
        &self,
        tokens: &TokenPair,
        operation: F,
    ) -> ProviderResult<OperationOutcome<T>>
    where
        F: Fn(DriveClient) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut current = tokens.clone();
        if self.policy.should_refresh(&current) {
            current = self.refresh(&current).await?;
        }

        let first_error = match operation(self.drive.authorized(&current.access_token)).await {
            Ok(result) => return Ok(outcome(result, current, tokens)),
            Err(err) if err.code().is_auth_retry_trigger() => err,
            Err(err) => return Err(err),
        };

        warn!(error = %first_error, "access token rejected, refreshing and retrying once");
        current = self.refresh(&current).await?;

        match operation(self.drive.authorized(&current.access_token)).await {
            Ok(result) => Ok(outcome(result, current, tokens)),
            Err(err) if err.code().is_auth_retry_trigger() => Err(ProviderError::retry_exhausted(
                "operation still unauthorized after refreshing the access token",
            )
            .with_provider("drive")
            .with_source(err)),
            Err(err) => Err(err),
        }
    }

    async fn refresh(&self, tokens: &TokenPair) -> ProviderResult<TokenPair> {
        let refreshed = self
            .refresher
            .refresh(&tokens.refresh_token)
            .await
            .map_err(|err| match err.code() {
                ProviderErrorCode::RefreshFailed | ProviderErrorCode::NetworkError => err,
                _ => ProviderError::refresh_failed(format!("token refresh failed: {}", err.message()))
                    .with_provider("oauth")
                    .with_source(err),
            })?;

        let next = tokens.apply(refreshed, Utc::now());
        debug!(
            changed = next.access_token != tokens.access_token,
            expires_at = ?next.expires_at,
            "access token refreshed"
        );
        Ok(next)
    }
}

fn outcome<T>(result: T, tokens: TokenPair, input: &TokenPair) -> OperationOutcome<T> {
    let rotated = tokens != *input;
    OperationOutcome {
        result,
        tokens,
        rotated,
    }
}
