use crate::api;
use crate::api::handlers::auth::AuthConfig;
use anyhow::Result;
use secrecy::SecretString;

/// Fully resolved server configuration.
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub jwt_secret: SecretString,
    pub auth_config: AuthConfig,
}

/// Handle the server action
pub async fn handle(args: Args) -> Result<()> {
    api::new(args.port, args.dsn, args.auth_config, args.jwt_secret).await
}
