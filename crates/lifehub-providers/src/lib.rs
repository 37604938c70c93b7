//! Google and Gemini clients for lifehub.
//!
//! - [`google`] - OAuth sign-in, token refresh, Drive listing and upload, and
//!   the [`TokenRefreshingClient`](google::TokenRefreshingClient) that wraps
//!   every Drive call with refresh-before-use and a single auth retry
//! - [`labels`] - the [`LabelGenerator`] seam and its Gemini implementation
//! - [`ProviderError`] - error type shared by all outbound calls
//!
//! # Example
//!
//! ```ignore
//! use lifehub_providers::google::{TokenPair, UI_PAGE_SIZE};
//!
//! let outcome = client
//!     .execute(&tokens, |drive| async move {
//!         drive.list_images(folder_id, None, UI_PAGE_SIZE).await
//!     })
//!     .await?;
//! if outcome.rotated {
//!     sessions.update_tokens(&session_id, outcome.tokens.clone());
//! }
//! ```

pub mod error;
pub mod google;
pub mod labels;
pub mod provider;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use labels::{DisabledLabeler, GeminiConfig, GeminiLabeler, LabelGenerator};
pub use provider::{BoxFuture, TokenRefresher};
