//! Session lifecycle: issuance, rotation, and revocation of credential pairs.
//!
//! A login mints a pair: a short-lived signed access token and a long-lived
//! opaque refresh secret stored only as a hash. Renewal rotates strictly
//! 1-for-1 (revoke-then-issue, abort if the atomic revoke reports no
//! change), so a replayed or concurrently-renewed secret can never yield two
//! live pairs. Brute-force bookkeeping lives in [`lockout`], keyed by
//! normalized email against an injected store.
//!
//! The only shared mutable state is in the relational store, and the store's
//! row-level conditional updates are the sole synchronization primitive; the
//! handlers themselves are stateless per request.

pub(crate) mod audit;
pub(crate) mod directory;
pub(crate) mod error;
pub(crate) mod issuer;
pub(crate) mod lockout;
mod rate_limit;
pub(crate) mod session;
mod state;
pub(crate) mod store;
pub(crate) mod types;
mod utils;

pub use audit::{AuditOutcome, AuditRecord, AuditSink, NoopAuditSink, TracingAuditSink};
pub use directory::{Identity, IdentityDirectory, MemoryIdentityDirectory, PgIdentityDirectory};
pub use error::AuthError;
pub use issuer::ClientMeta;
pub use lockout::{LockoutStore, MemoryLockoutStore, PgLockoutStore};
pub use rate_limit::NoopRateLimiter;
pub use state::{AuthConfig, AuthState};
pub use store::{
    spawn_token_sweeper, CredentialStore, MemoryCredentialStore, PgCredentialStore,
};
pub use types::{
    AuthResponse, DeviceInfo, LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest,
    TokenPair, UserSummary,
};
pub use utils::hash_password;
