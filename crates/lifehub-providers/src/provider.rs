//! Seams between the refresh wrapper and the services it talks to.

use std::future::Future;
use std::pin::Pin;

use crate::error::ProviderResult;
use crate::google::RefreshedToken;

/// A boxed future for async trait methods.
///
/// Boxed futures keep the traits object-safe so they can be shared as
/// `Arc<dyn Trait>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Exchanges a refresh token for a new access token.
///
/// [`OAuthClient`](crate::google::OAuthClient) implements this against
/// Google's token endpoint; tests plug in scripted refreshers.
///
/// Implementations report a rejected refresh token as
/// [`ProviderErrorCode::RefreshFailed`](crate::ProviderErrorCode::RefreshFailed)
/// and a timeout as a network error.
pub trait TokenRefresher: Send + Sync {
    /// Requests a new access token for `refresh_token`.
    fn refresh<'a>(&'a self, refresh_token: &'a str)
    -> BoxFuture<'a, ProviderResult<RefreshedToken>>;
}
