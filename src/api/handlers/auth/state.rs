//! Auth configuration and composed state shared by the handlers.

use chrono::Duration;
use secrecy::SecretString;
use std::sync::Arc;

use super::audit::AuditSink;
use super::directory::IdentityDirectory;
use super::issuer::CredentialIssuer;
use super::lockout::{LockoutGuard, LockoutStore};
use super::rate_limit::RateLimiter;
use super::store::CredentialStore;

const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;
const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;
const DEFAULT_JWT_ISSUER: &str = "renovo";
const DEFAULT_JWT_AUDIENCE: &str = "renovo-clients";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    max_failed_attempts: u32,
    lockout_seconds: i64,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    sweep_interval_seconds: u64,
    jwt_issuer: String,
    jwt_audience: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            jwt_issuer: DEFAULT_JWT_ISSUER.to_string(),
            jwt_audience: DEFAULT_JWT_AUDIENCE.to_string(),
        }
    }

    #[must_use]
    pub fn with_max_failed_attempts(mut self, attempts: u32) -> Self {
        self.max_failed_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_jwt_issuer(mut self, issuer: String) -> Self {
        self.jwt_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_jwt_audience(mut self, audience: String) -> Self {
        self.jwt_audience = audience;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }

    #[must_use]
    pub fn lockout_seconds(&self) -> i64 {
        self.lockout_seconds
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn sweep_interval_seconds(&self) -> u64 {
        self.sweep_interval_seconds
    }

    #[must_use]
    pub fn jwt_issuer(&self) -> &str {
        &self.jwt_issuer
    }

    #[must_use]
    pub fn jwt_audience(&self) -> &str {
        &self.jwt_audience
    }
}

pub struct AuthState {
    config: AuthConfig,
    guard: LockoutGuard,
    issuer: CredentialIssuer,
    directory: Arc<dyn IdentityDirectory>,
    audit: Arc<dyn AuditSink>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    /// Compose the auth state from injected stores and collaborators.
    #[must_use]
    pub fn new(
        config: AuthConfig,
        directory: Arc<dyn IdentityDirectory>,
        credential_store: Arc<dyn CredentialStore>,
        lockout_store: Arc<dyn LockoutStore>,
        audit: Arc<dyn AuditSink>,
        rate_limiter: Arc<dyn RateLimiter>,
        jwt_secret: SecretString,
    ) -> Self {
        let guard = LockoutGuard::new(
            lockout_store,
            config.max_failed_attempts(),
            Duration::seconds(config.lockout_seconds()),
        );
        let issuer = CredentialIssuer::new(
            credential_store,
            Arc::clone(&directory),
            jwt_secret,
            config.jwt_issuer().to_string(),
            config.jwt_audience().to_string(),
            Duration::seconds(config.access_ttl_seconds()),
            Duration::seconds(config.refresh_ttl_seconds()),
        );
        Self {
            config,
            guard,
            issuer,
            directory,
            audit,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn guard(&self) -> &LockoutGuard {
        &self.guard
    }

    pub(super) fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }

    pub(super) fn directory(&self) -> &dyn IdentityDirectory {
        self.directory.as_ref()
    }

    pub(super) fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}
