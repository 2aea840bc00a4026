//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the server action with its full
//! configuration state.

use crate::api::handlers::auth::AuthConfig;
use crate::cli::actions::{server::Args, Action};
use crate::cli::commands;
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let jwt_secret = matches
        .get_one::<String>(commands::ARG_JWT_SECRET)
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --jwt-secret")?;

    let frontend_base_url = matches
        .get_one::<String>(commands::ARG_FRONTEND_BASE_URL)
        .cloned()
        .unwrap_or_else(|| "http://localhost:5173".to_string());

    let mut auth_config = AuthConfig::new(frontend_base_url);
    if let Some(issuer) = matches.get_one::<String>(commands::ARG_JWT_ISSUER) {
        auth_config = auth_config.with_jwt_issuer(issuer.clone());
    }
    if let Some(audience) = matches.get_one::<String>(commands::ARG_JWT_AUDIENCE) {
        auth_config = auth_config.with_jwt_audience(audience.clone());
    }
    if let Some(seconds) = matches.get_one::<i64>(commands::ARG_ACCESS_TTL_SECONDS) {
        auth_config = auth_config.with_access_ttl_seconds(*seconds);
    }
    if let Some(seconds) = matches.get_one::<i64>(commands::ARG_REFRESH_TTL_SECONDS) {
        auth_config = auth_config.with_refresh_ttl_seconds(*seconds);
    }
    if let Some(attempts) = matches.get_one::<u32>(commands::ARG_MAX_FAILED_ATTEMPTS) {
        auth_config = auth_config.with_max_failed_attempts(*attempts);
    }
    if let Some(seconds) = matches.get_one::<i64>(commands::ARG_LOCKOUT_SECONDS) {
        auth_config = auth_config.with_lockout_seconds(*seconds);
    }
    if let Some(seconds) = matches.get_one::<u64>(commands::ARG_SWEEP_INTERVAL_SECONDS) {
        auth_config = auth_config.with_sweep_interval_seconds(*seconds);
    }

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        jwt_secret,
        auth_config,
    })))
}
