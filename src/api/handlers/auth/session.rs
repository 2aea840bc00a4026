//! Login, refresh, and logout orchestration and endpoints.
//!
//! Per-attempt login state machine: lockout gate, then password check, then
//! either the two-factor detour or a freshly issued pair. Every terminal
//! branch emits exactly one audit event. Renewal delegates to the issuer's
//! revoke-then-issue rotation and audits only on success; logout is
//! idempotent and reports success even for an already-invalid secret.

use axum::{
    extract::Extension,
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use super::{
    audit::{AuditOutcome, AuditRecord},
    error::AuthError,
    issuer::ClientMeta,
    rate_limit::{RateLimitAction, RateLimitDecision},
    state::AuthState,
    types::{
        AuthResponse, LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest, UserSummary,
    },
    utils::{extract_client_ip, normalize_email, valid_email, verify_password},
};

/// Surface the remaining-attempts hint only inside the warning band.
const WARNING_BAND: u32 = 3;

fn client_meta(headers: &HeaderMap, fingerprint: Option<String>, user_agent: Option<String>) -> ClientMeta {
    let header_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ClientMeta {
        device_fingerprint: fingerprint,
        user_agent: user_agent.or(header_agent),
        ip_address: extract_client_ip(headers),
    }
}

fn error_reply(err: &AuthError, remaining_attempts: Option<u32>) -> (StatusCode, AuthResponse) {
    (err.status_code(), AuthResponse::from_error(err, remaining_attempts))
}

pub(crate) async fn process_login(
    state: &AuthState,
    request: LoginRequest,
    meta: ClientMeta,
) -> (StatusCode, AuthResponse) {
    // Local validation happens before the guard or any store is touched.
    let email_raw = request.email.trim();
    let password = request.password.as_str();
    if email_raw.is_empty() || password.is_empty() {
        return error_reply(&AuthError::MissingCredentials, None);
    }

    if state
        .rate_limiter()
        .check_ip(meta.ip_address.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return error_reply(&AuthError::RateLimited, None);
    }

    let email = normalize_email(email_raw);
    if !valid_email(&email) {
        // Not a real identity key; reject without touching the counter.
        state.audit().record(AuditRecord {
            outcome: AuditOutcome::Failed,
            email: Some(email),
            user_id: None,
            ip_address: meta.ip_address.clone(),
        });
        return error_reply(&AuthError::InvalidCredentials, None);
    }

    // Locked identities short-circuit before any password comparison, so
    // attempts while locked never re-increment the counter.
    let status = match state.guard().check(&email).await {
        Ok(status) => status,
        Err(err) => {
            error!("Lockout check failed: {err}");
            return error_reply(&AuthError::ServerError, None);
        }
    };
    if !status.allowed {
        let lockout_until = status.lockout_until.unwrap_or_default();
        state.audit().record(AuditRecord {
            outcome: AuditOutcome::Blocked,
            email: Some(email),
            user_id: None,
            ip_address: meta.ip_address.clone(),
        });
        return error_reply(&AuthError::AccountLocked { lockout_until }, None);
    }

    let identity = match state.directory().find_by_email(&email).await {
        Ok(identity) => identity,
        Err(err) => {
            error!("Directory lookup failed: {err}");
            return error_reply(&AuthError::ServerError, None);
        }
    };

    // Unknown account and wrong password take the same path so callers
    // cannot probe for registered emails.
    let verified = identity
        .as_ref()
        .is_some_and(|identity| verify_password(password, &identity.password_hash).is_ok());
    if !verified {
        let status = match state.guard().record_failure(&email).await {
            Ok(status) => status,
            Err(err) => {
                error!("Failed to record login failure: {err}");
                return error_reply(&AuthError::ServerError, None);
            }
        };
        state.audit().record(AuditRecord {
            outcome: AuditOutcome::Failed,
            email: Some(email),
            user_id: identity.as_ref().map(|identity| identity.id),
            ip_address: meta.ip_address.clone(),
        });
        if !status.allowed {
            let lockout_until = status.lockout_until.unwrap_or_default();
            return error_reply(&AuthError::AccountLocked { lockout_until }, None);
        }
        let hint = (status.remaining_attempts <= WARNING_BAND)
            .then_some(status.remaining_attempts);
        return error_reply(&AuthError::InvalidCredentials, hint);
    }
    let Some(identity) = identity else {
        return error_reply(&AuthError::ServerError, None);
    };

    if identity.two_factor_enabled {
        // Valid password, but the pair is withheld until the second factor
        // completes; the correlation id ties the two steps together.
        let session_id = Uuid::new_v4();
        state.audit().record(AuditRecord {
            outcome: AuditOutcome::TwoFactorPending,
            email: Some(identity.email.clone()),
            user_id: Some(identity.id),
            ip_address: meta.ip_address.clone(),
        });
        return (StatusCode::OK, AuthResponse::two_factor_pending(session_id));
    }

    let tokens = match state.issuer().issue_pair(&identity, &meta).await {
        Ok(tokens) => tokens,
        Err(err) => {
            error!("Failed to issue credential pair: {err}");
            return error_reply(&AuthError::ServerError, None);
        }
    };
    if let Err(err) = state.guard().reset(&email).await {
        // The login still succeeded; a stale counter corrects itself on the
        // next successful attempt.
        error!("Failed to reset lockout counter: {err}");
    }
    state.audit().record(AuditRecord {
        outcome: AuditOutcome::Success,
        email: Some(identity.email.clone()),
        user_id: Some(identity.id),
        ip_address: meta.ip_address,
    });

    let user = UserSummary {
        id: identity.id,
        email: identity.email,
        role: identity.role,
    };
    (StatusCode::OK, AuthResponse::authenticated(user, tokens))
}

pub(crate) async fn process_refresh(
    state: &AuthState,
    request: RefreshRequest,
    meta: ClientMeta,
) -> (StatusCode, AuthResponse) {
    if request.refresh_token.trim().is_empty() {
        return error_reply(&AuthError::MissingCredentials, None);
    }

    if state
        .rate_limiter()
        .check_ip(meta.ip_address.as_deref(), RateLimitAction::Refresh)
        == RateLimitDecision::Limited
    {
        return error_reply(&AuthError::RateLimited, None);
    }

    match state.issuer().renew(&request.refresh_token, &meta).await {
        Ok((tokens, identity)) => {
            state.audit().record(AuditRecord {
                outcome: AuditOutcome::Renewed,
                email: Some(identity.email),
                user_id: Some(identity.id),
                ip_address: meta.ip_address,
            });
            (StatusCode::OK, AuthResponse::renewed(tokens))
        }
        // Failed renewals are routine (races, retries, expiry) and are not
        // audit-worthy on their own.
        Err(AuthError::InvalidRefreshToken) => {
            debug!("refresh rejected: invalid or expired token");
            error_reply(&AuthError::InvalidRefreshToken, None)
        }
        Err(err) => {
            error!("Refresh failed: {err}");
            error_reply(&AuthError::ServerError, None)
        }
    }
}

pub(crate) async fn process_logout(
    state: &AuthState,
    request: LogoutRequest,
    meta: ClientMeta,
) -> (StatusCode, LogoutResponse) {
    if request.refresh_token.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            LogoutResponse {
                success: false,
                message: Some(AuthError::MissingCredentials.client_message()),
            },
        );
    }

    match state.issuer().revoke(&request.refresh_token, "logout").await {
        // An already-revoked or unknown secret is still a successful logout
        // from the caller's perspective.
        Ok(_changed) => {}
        Err(err) => {
            error!("Logout revocation failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                LogoutResponse {
                    success: false,
                    message: Some(AuthError::ServerError.client_message()),
                },
            );
        }
    }

    state.audit().record(AuditRecord {
        outcome: AuditOutcome::Logout,
        email: None,
        user_id: None,
        ip_address: meta.ip_address,
    });
    (
        StatusCode::OK,
        LogoutResponse {
            success: true,
            message: Some("Logged out".to_string()),
        },
    )
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated, or second factor required", body = AuthResponse),
        (status = 400, description = "Missing credentials", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = AuthResponse),
        (status = 423, description = "Account locked", body = AuthResponse),
        (status = 429, description = "Rate limited", body = AuthResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        let (status, body) = error_reply(&AuthError::MissingCredentials, None);
        return (status, Json(body)).into_response();
    };
    let device = request.device_info.clone().unwrap_or_default();
    let meta = client_meta(&headers, device.fingerprint, device.user_agent);
    let (status, body) = process_login(&auth_state, request, meta).await;
    (status, Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Pair rotated", body = AuthResponse),
        (status = 400, description = "Missing refresh token", body = AuthResponse),
        (status = 401, description = "Invalid or expired refresh token", body = AuthResponse)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        let (status, body) = error_reply(&AuthError::MissingCredentials, None);
        return (status, Json(body)).into_response();
    };
    let meta = client_meta(&headers, request.device_id.clone(), None);
    let (status, body) = process_refresh(&auth_state, request, meta).await;
    (status, Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 400, description = "Missing refresh token", body = LogoutResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(LogoutResponse {
                success: false,
                message: Some(AuthError::MissingCredentials.client_message()),
            }),
        )
            .into_response();
    };
    let meta = client_meta(&headers, None, None);
    let (status, body) = process_logout(&auth_state, request, meta).await;
    (status, Json(body)).into_response()
}
