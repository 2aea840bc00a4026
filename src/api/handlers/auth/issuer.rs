//! Credential pair minting and rotation.
//!
//! A pair is one short-lived signed access token plus one long-lived opaque
//! refresh secret. Renewal is revoke-then-issue: the old record's atomic
//! revoke must report "changed" before a new pair is minted. A renewal that
//! loses that race fails without issuing, which is what keeps a replayed or
//! concurrently-renewed secret from ever producing two live pairs.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::directory::{Identity, IdentityDirectory};
use super::error::{AuthError, AuthResult};
use super::store::{CredentialStore, NewRefreshToken};
use super::types::TokenPair;
use super::utils::{generate_refresh_secret, hash_refresh_secret};

/// Claims carried by the signed access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub aud: String,
    /// Correlates the access token with its refresh record.
    pub jti: Uuid,
}

/// Client metadata bound to a refresh record at issuance.
#[derive(Clone, Debug, Default)]
pub struct ClientMeta {
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

pub struct CredentialIssuer {
    store: Arc<dyn CredentialStore>,
    directory: Arc<dyn IdentityDirectory>,
    jwt_secret: SecretString,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl CredentialIssuer {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        directory: Arc<dyn IdentityDirectory>,
        jwt_secret: SecretString,
        issuer: String,
        audience: String,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            jwt_secret,
            issuer,
            audience,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Mint a fresh pair for an identity and persist the refresh half's hash.
    pub async fn issue_pair(&self, identity: &Identity, meta: &ClientMeta) -> AuthResult<TokenPair> {
        let now = Utc::now();
        let jti = Uuid::new_v4();
        let claims = AccessTokenClaims {
            sub: identity.id,
            email: identity.email.clone(),
            role: identity.role.clone(),
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti,
        };
        let access_token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.expose_secret().as_bytes()),
        )?;

        let refresh_secret =
            generate_refresh_secret().map_err(|_| AuthError::ServerError)?;
        self.store
            .create(NewRefreshToken {
                user_id: identity.id,
                token_hash: hash_refresh_secret(&refresh_secret),
                jti,
                device_fingerprint: meta.device_fingerprint.clone(),
                user_agent: meta.user_agent.clone(),
                ip_address: meta.ip_address.clone(),
                issued_at: now,
                expires_at: now + self.refresh_ttl,
            })
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh_secret,
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// Exchange a refresh secret for a brand-new pair, rotating the old one.
    /// Returns the identity alongside the pair so callers can audit the
    /// renewal without a second directory round trip.
    pub async fn renew(
        &self,
        refresh_secret: &str,
        meta: &ClientMeta,
    ) -> AuthResult<(TokenPair, Identity)> {
        let hash = hash_refresh_secret(refresh_secret);
        let Some(record) = self.store.find_by_hash(&hash).await? else {
            return Err(AuthError::InvalidRefreshToken);
        };

        let now = Utc::now();
        if record.is_revoked {
            if !record.is_expired(now) {
                // A revoked-but-unexpired secret coming back is a possible
                // theft signal, distinct from the routine race-loser path.
                warn!(
                    user_id = %record.user_id,
                    jti = %record.jti,
                    "revoked refresh token presented before expiry"
                );
            }
            return Err(AuthError::InvalidRefreshToken);
        }
        if record.is_expired(now) {
            return Err(AuthError::InvalidRefreshToken);
        }

        // Revoke first; only the caller that actually flipped the flag may
        // issue. The losing side of a concurrent renewal lands here with
        // `false` and must not mint a second pair.
        if !self.store.revoke(&hash, "rotated").await? {
            debug!(jti = %record.jti, "lost renewal race, no pair issued");
            return Err(AuthError::InvalidRefreshToken);
        }

        let Some(identity) = self.directory.find_by_id(record.user_id).await? else {
            // Account vanished or was deactivated between issuance and renewal.
            return Err(AuthError::InvalidRefreshToken);
        };

        let pair = self.issue_pair(&identity, meta).await?;
        Ok((pair, identity))
    }

    /// Revoke a single refresh credential. Returns whether a record changed.
    pub async fn revoke(&self, refresh_secret: &str, reason: &str) -> AuthResult<bool> {
        let hash = hash_refresh_secret(refresh_secret);
        self.store.revoke(&hash, reason).await
    }

    /// Revoke every active refresh credential for an identity.
    pub async fn revoke_all(&self, user_id: Uuid, reason: &str) -> AuthResult<u64> {
        self.store.revoke_all(user_id, reason).await
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::directory::MemoryIdentityDirectory;
    use crate::api::handlers::auth::store::MemoryCredentialStore;
    use crate::api::handlers::auth::utils::hash_password;
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    const JWT_SECRET: &str = "unit-test-signing-secret";

    fn identity() -> Identity {
        Identity {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            role: "patient".to_string(),
            password_hash: hash_password("Str0ngPass!").expect("hash"),
            two_factor_enabled: false,
        }
    }

    fn issuer_with(identity: &Identity) -> CredentialIssuer {
        CredentialIssuer::new(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(MemoryIdentityDirectory::with_users(vec![identity.clone()])),
            SecretString::from(JWT_SECRET.to_string()),
            "renovo".to_string(),
            "renovo-clients".to_string(),
            Duration::seconds(900),
            Duration::seconds(604_800),
        )
    }

    fn decode_claims(token: &str) -> AccessTokenClaims {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&["renovo"]);
        validation.set_audience(&["renovo-clients"]);
        decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(JWT_SECRET.as_bytes()),
            &validation,
        )
        .expect("decode")
        .claims
    }

    #[tokio::test]
    async fn issued_pair_carries_expected_claims() {
        let identity = identity();
        let issuer = issuer_with(&identity);
        let meta = ClientMeta::default();

        let pair = issuer.issue_pair(&identity, &meta).await.expect("issue");
        assert_eq!(pair.expires_in, 900);

        let claims = decode_claims(&pair.access_token);
        assert_eq!(claims.sub, identity.id);
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.role, "patient");
        assert!(claims.exp > claims.iat);
    }

    #[tokio::test]
    async fn renew_rotates_and_rejects_the_old_secret() {
        let identity = identity();
        let issuer = issuer_with(&identity);
        let meta = ClientMeta::default();

        let pair = issuer.issue_pair(&identity, &meta).await.expect("issue");
        let (renewed, renewed_for) = issuer.renew(&pair.refresh_token, &meta).await.expect("renew");
        assert_ne!(renewed.refresh_token, pair.refresh_token);
        assert_eq!(renewed_for.id, identity.id);

        // The rotated-away secret never works again.
        let replay = issuer.renew(&pair.refresh_token, &meta).await;
        assert!(matches!(replay, Err(AuthError::InvalidRefreshToken)));
    }

    #[tokio::test]
    async fn renew_rejects_unknown_secret() {
        let identity = identity();
        let issuer = issuer_with(&identity);
        let result = issuer.renew("never-issued", &ClientMeta::default()).await;
        assert!(matches!(result, Err(AuthError::InvalidRefreshToken)));
    }

    #[tokio::test]
    async fn concurrent_renewals_issue_exactly_one_pair() {
        let identity = identity();
        let issuer = Arc::new(issuer_with(&identity));
        let pair = issuer
            .issue_pair(&identity, &ClientMeta::default())
            .await
            .expect("issue");

        let secret = pair.refresh_token;
        let (left, right) = tokio::join!(
            {
                let issuer = Arc::clone(&issuer);
                let secret = secret.clone();
                async move { issuer.renew(&secret, &ClientMeta::default()).await }
            },
            {
                let issuer = Arc::clone(&issuer);
                let secret = secret.clone();
                async move { issuer.renew(&secret, &ClientMeta::default()).await }
            }
        );

        let successes = [left.is_ok(), right.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn revoke_reports_change_once() {
        let identity = identity();
        let issuer = issuer_with(&identity);
        let pair = issuer
            .issue_pair(&identity, &ClientMeta::default())
            .await
            .expect("issue");

        assert!(issuer.revoke(&pair.refresh_token, "logout").await.expect("revoke"));
        assert!(!issuer.revoke(&pair.refresh_token, "logout").await.expect("revoke"));
    }
}
