//! # Renovo (Authentication Session Lifecycle)
//!
//! `renovo` is the authentication authority for a patient/clinician health
//! platform. It owns the session credential lifecycle: issuance, rotation,
//! and revocation of paired short-lived/long-lived credentials, plus the
//! brute-force lockout bookkeeping around login.
//!
//! ## Credential model
//!
//! A successful login mints a **pair**: a short-lived HS256-signed access
//! token (claims: subject, email, role, expiry, issuer, audience, `jti`) and
//! a long-lived opaque refresh secret. The database only ever stores the
//! SHA-256 hash of the refresh secret.
//!
//! - **Rotation is 1-for-1:** renewing a refresh secret atomically revokes
//!   its record before a new pair is issued. A renewal that loses that race
//!   fails without issuing, so a replayed secret can never produce two live
//!   pairs.
//! - **Lockout:** failed logins are counted per normalized email against an
//!   injected keyed store; five failures arm a lockout window, and locked
//!   identities are rejected before any password comparison.
//!
//! ## Client side
//!
//! The [`client`] module provides the caller-side session store: a reactive
//! state container (authenticated / two-factor-pending / unauthenticated)
//! and a single-flight proactive renewal scheduler that rotates the pair
//! ahead of expiry, leaving reactive on-401 recovery to the HTTP layer.

pub mod api;
pub mod cli;
pub mod client;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
