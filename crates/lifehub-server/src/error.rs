//! Server error types and their HTTP rendering.
//!
//! [`ServerError`] answers with a plain-text body, the convention of the Drive
//! and photo endpoints. Calendar handlers wrap it in [`JsonError`] to answer
//! with `{"error": "..."}` instead.

use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lifehub_providers::{ProviderError, ProviderErrorCode};
use thiserror::Error;
use tracing::error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Body sent when a session can no longer refresh its tokens.
pub const REAUTH_MESSAGE: &str = "Token expired, please sign in again";

/// Errors that can occur while serving a request.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// No session, or the session cookie is unknown.
    #[error("Unauthorized")]
    Unauthorized,

    /// The session's tokens could not be refreshed.
    #[error("{}", REAUTH_MESSAGE)]
    SessionExpired,

    #[error("Missing DRIVE_FOLDER_ID")]
    MissingFolder,

    #[error("{message}")]
    BadRequest { message: String },

    #[error("{message}")]
    NotFound { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// True when the user has to sign in again.
    pub fn requires_reauth(&self) -> bool {
        match self {
            Self::SessionExpired => true,
            Self::Provider(e) => e.requires_reauth(),
            _ => false,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Io(_) | Self::Config { .. } | Self::Database(_) | Self::MissingFolder => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Provider(e) => provider_status(e.code()),
        }
    }

    /// Text shown to the client. Database and IO details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(_) => "database error".to_string(),
            Self::Io(_) => "internal error".to_string(),
            Self::Provider(e) if e.requires_reauth() => REAUTH_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    fn log(&self) {
        if self.status().is_server_error() {
            error!(error = %self, "request failed");
        }
    }
}

fn provider_status(code: ProviderErrorCode) -> StatusCode {
    match code {
        ProviderErrorCode::AuthenticationFailed
        | ProviderErrorCode::RefreshFailed
        | ProviderErrorCode::RetryExhausted => StatusCode::UNAUTHORIZED,
        ProviderErrorCode::AuthorizationFailed => StatusCode::FORBIDDEN,
        ProviderErrorCode::NotFound => StatusCode::NOT_FOUND,
        ProviderErrorCode::BadRequest => StatusCode::BAD_REQUEST,
        ProviderErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ProviderErrorCode::ConfigurationError | ProviderErrorCode::InternalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ProviderErrorCode::NetworkError
        | ProviderErrorCode::ServerError
        | ProviderErrorCode::InvalidResponse => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), self.public_message()).into_response()
    }
}

/// A [`ServerError`] rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct JsonError(pub ServerError);

impl From<ServerError> for JsonError {
    fn from(err: ServerError) -> Self {
        Self(err)
    }
}

impl From<sqlx::Error> for JsonError {
    fn from(err: sqlx::Error) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for JsonError {
    fn into_response(self) -> Response {
        self.0.log();
        let body = serde_json::json!({ "error": self.0.public_message() });
        (self.0.status(), Json(body)).into_response()
    }
}
