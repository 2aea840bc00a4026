//! Authentication error taxonomy.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Authentication errors surfaced by the session lifecycle.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required field was missing or blank; rejected before any state is touched.
    #[error("Missing credentials")]
    MissingCredentials,

    /// Wrong password or unknown account. The two are indistinguishable on purpose.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// The account is locked until the given time.
    #[error("Account locked until {lockout_until}")]
    AccountLocked { lockout_until: DateTime<Utc> },

    /// Request-level throttle, independent of the per-account lockout.
    #[error("Too many requests, please try again later")]
    RateLimited,

    /// Refresh token absent, revoked, expired, or already rotated.
    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JWT encoding/decoding error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Password hash parsing or verification machinery failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// Catch-all for internal failures
    #[error("Internal server error")]
    ServerError,
}

impl AuthError {
    /// Stable machine-readable code carried in API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked { .. } => "account_locked",
            AuthError::RateLimited => "rate_limited",
            AuthError::InvalidRefreshToken => "invalid_refresh_token",
            AuthError::Database(_)
            | AuthError::Jwt(_)
            | AuthError::HashingFailed
            | AuthError::ServerError => "server_error",
        }
    }

    /// Client-safe message that never leaks internals.
    ///
    /// Database and JWT errors are collapsed to a generic message so the
    /// response cannot disclose schema or token structure.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Database(_) | AuthError::Jwt(_) | AuthError::HashingFailed => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// HTTP status for the error when surfaced through the API.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials | AuthError::InvalidRefreshToken => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::AccountLocked { .. } => StatusCode::LOCKED,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Database(_)
            | AuthError::Jwt(_)
            | AuthError::HashingFailed
            | AuthError::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
