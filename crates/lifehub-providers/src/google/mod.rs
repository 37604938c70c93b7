//! Google OAuth sign-in, token refresh and Drive access.
//!
//! # Request flow
//!
//! 1. [`OAuthClient`] runs the authorization-code flow at sign-in and yields
//!    the session's [`TokenPair`]
//! 2. Route handlers call [`TokenRefreshingClient::execute`] with that pair
//!    and a Drive operation (`list_images`, `list_all_images`, `upload_image`,
//!    `grant_public_read`)
//! 3. The wrapper refreshes through the [`TokenRefresher`](crate::TokenRefresher)
//!    seam, runs the operation on a fresh [`DriveClient`] handle, retries once
//!    on a 401, and hands back an [`OperationOutcome`] with the tokens to
//!    persist

mod config;
mod drive;
mod oauth;
mod session;
mod tokens;

pub use config::{GoogleConfig, GoogleEndpoints, OAuthCredentials};
pub use drive::{DriveClient, DriveFile, IMPORT_PAGE_SIZE, ImagePage, UI_PAGE_SIZE};
pub use oauth::{OAuthClient, PkceFlow, UserInfo, random_token};
pub use session::{DEFAULT_EXPIRY_MARGIN, OperationOutcome, RefreshPolicy, TokenRefreshingClient};
pub use tokens::{RefreshedToken, TokenPair};
