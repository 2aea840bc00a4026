//! Request/response types for the auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::AuthError;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Stable client-generated device fingerprint, if the caller has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct RefreshRequest {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Non-sensitive identity snapshot returned to the caller.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Uniform response for login and refresh.
///
/// Exactly one of the success shapes is populated: tokens for a completed
/// login/renewal, or `requires_two_fa` + `session_id` when the caller must
/// complete a second factor first.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_two_fa: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_until: Option<DateTime<Utc>>,
}

impl AuthResponse {
    #[must_use]
    pub fn authenticated(user: UserSummary, tokens: TokenPair) -> Self {
        Self {
            success: true,
            user: Some(user),
            tokens: Some(tokens),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn renewed(tokens: TokenPair) -> Self {
        Self {
            success: true,
            tokens: Some(tokens),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn two_factor_pending(session_id: Uuid) -> Self {
        Self {
            success: true,
            requires_two_fa: Some(true),
            session_id: Some(session_id.to_string()),
            ..Self::default()
        }
    }

    /// Build a failure response; `remaining_attempts` is the warning-band hint.
    #[must_use]
    pub fn from_error(err: &AuthError, remaining_attempts: Option<u32>) -> Self {
        let lockout_until = match err {
            AuthError::AccountLocked { lockout_until } => Some(*lockout_until),
            _ => None,
        };
        Self {
            success: false,
            error: Some(err.client_message()),
            error_code: Some(err.error_code().to_string()),
            remaining_attempts,
            lockout_until,
            ..Self::default()
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct LogoutResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
