//! HTTP server: Google sign-in, sessions, photo library, calendar.
//!
//! This crate provides the `lifehub` binary. It serves:
//! - Google sign-in with server-side sessions and token refresh
//! - Drive folder browsing, photo upload (de-duplicated, labelled) and import
//! - Calendar CRUD and the countdown summary
//!
//! Everything is wired through [`AppState`]; [`routes::router`] builds the
//! axum application from it.

pub mod cli;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod error;
pub mod routes;
pub mod secret;
pub mod session;
pub mod signals;
pub mod state;
pub mod store;

pub use cli::Cli;
pub use config::ServerConfig;
pub use dedup::{Deduped, UploadDeduplicator, spawn_eviction};
pub use error::{JsonError, ServerError, ServerResult};
pub use routes::router;
pub use session::{AuthSession, Session, SessionStore, spawn_session_pruning};
pub use signals::{ShutdownSignal, SignalHandler};
pub use state::{AppState, GoogleServices};
pub use store::Store;
