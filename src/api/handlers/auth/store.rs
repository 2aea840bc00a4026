//! Persistent refresh-token records and their lifecycle.
//!
//! Only the SHA-256 hash of a refresh secret is ever stored. Revocation is a
//! single conditional update: "flip the flag where currently unset, report
//! whether a row changed". Two concurrent renewals of the same secret race
//! on exactly that statement, and the loser must observe `false`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use super::error::AuthResult;

/// One issued refresh credential, as persisted.
#[derive(Clone, Debug)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub jti: Uuid,
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
    pub is_revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Fields needed to persist a freshly minted refresh credential.
#[derive(Clone, Debug)]
pub struct NewRefreshToken {
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub jti: Uuid,
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_hash(&self, hash: &[u8]) -> AuthResult<Option<RefreshTokenRecord>>;
    async fn find_by_jti(&self, jti: Uuid) -> AuthResult<Option<RefreshTokenRecord>>;
    /// Records that are neither revoked nor expired.
    async fn find_active(&self, user_id: Uuid) -> AuthResult<Vec<RefreshTokenRecord>>;
    async fn create(&self, token: NewRefreshToken) -> AuthResult<RefreshTokenRecord>;
    /// Atomically flip `is_revoked` if currently unset. Returns whether this
    /// call made the change; `false` means someone else already revoked it.
    async fn revoke(&self, hash: &[u8], reason: &str) -> AuthResult<bool>;
    async fn revoke_all(&self, user_id: Uuid, reason: &str) -> AuthResult<u64>;
    /// Sweep: delete rows that are expired or revoked. Runs periodically,
    /// never per-request.
    async fn delete_expired(&self) -> AuthResult<u64>;
}

pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        token_hash: row.get("token_hash"),
        jti: row.get("jti"),
        device_fingerprint: row.get("device_fingerprint"),
        user_agent: row.get("user_agent"),
        ip_address: row.get("ip_address"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
        revoked_at: row.get("revoked_at"),
        revocation_reason: row.get("revocation_reason"),
        is_revoked: row.get("is_revoked"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLUMNS: &str = r"
    id, user_id, token_hash, jti, device_fingerprint, user_agent, ip_address,
    issued_at, expires_at, revoked_at, revocation_reason, is_revoked,
    created_at, updated_at
";

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_hash(&self, hash: &[u8]) -> AuthResult<Option<RefreshTokenRecord>> {
        let query = format!(
            "SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE token_hash = $1 LIMIT 1"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn find_by_jti(&self, jti: Uuid) -> AuthResult<Option<RefreshTokenRecord>> {
        let query =
            format!("SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE jti = $1 LIMIT 1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(jti)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn find_active(&self, user_id: Uuid) -> AuthResult<Vec<RefreshTokenRecord>> {
        let query = format!(
            r"
            SELECT {SELECT_COLUMNS}
            FROM refresh_tokens
            WHERE user_id = $1
              AND NOT is_revoked
              AND expires_at > NOW()
            ORDER BY issued_at DESC
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn create(&self, token: NewRefreshToken) -> AuthResult<RefreshTokenRecord> {
        let query = format!(
            r"
            INSERT INTO refresh_tokens
                (user_id, token_hash, jti, device_fingerprint, user_agent, ip_address,
                 issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {SELECT_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.jti)
            .bind(&token.device_fingerprint)
            .bind(&token.user_agent)
            .bind(&token.ip_address)
            .bind(token.issued_at)
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(record_from_row(&row))
    }

    async fn revoke(&self, hash: &[u8], reason: &str) -> AuthResult<bool> {
        // The WHERE clause carries the whole race: only one caller can
        // observe rows_affected == 1 for a given hash.
        let query = r"
            UPDATE refresh_tokens
            SET is_revoked = true,
                revoked_at = NOW(),
                revocation_reason = $2,
                updated_at = NOW()
            WHERE token_hash = $1
              AND NOT is_revoked
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(hash)
            .bind(reason)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all(&self, user_id: Uuid, reason: &str) -> AuthResult<u64> {
        let query = r"
            UPDATE refresh_tokens
            SET is_revoked = true,
                revoked_at = NOW(),
                revocation_reason = $2,
                updated_at = NOW()
            WHERE user_id = $1
              AND NOT is_revoked
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(reason)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> AuthResult<u64> {
        let query = r"
            DELETE FROM refresh_tokens
            WHERE expires_at <= NOW()
               OR is_revoked
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Mutexed map store for tests and single-process wiring. Check-and-flip
/// happens under one lock acquisition, matching the row-level atomicity the
/// Postgres store relies on.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, RefreshTokenRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_hash(&self, hash: &[u8]) -> AuthResult<Option<RefreshTokenRecord>> {
        let records = self.lock();
        Ok(records
            .values()
            .find(|record| record.token_hash == hash)
            .cloned())
    }

    async fn find_by_jti(&self, jti: Uuid) -> AuthResult<Option<RefreshTokenRecord>> {
        let records = self.lock();
        Ok(records.values().find(|record| record.jti == jti).cloned())
    }

    async fn find_active(&self, user_id: Uuid) -> AuthResult<Vec<RefreshTokenRecord>> {
        let now = Utc::now();
        let records = self.lock();
        Ok(records
            .values()
            .filter(|record| {
                record.user_id == user_id && !record.is_revoked && !record.is_expired(now)
            })
            .cloned()
            .collect())
    }

    async fn create(&self, token: NewRefreshToken) -> AuthResult<RefreshTokenRecord> {
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            jti: token.jti,
            device_fingerprint: token.device_fingerprint,
            user_agent: token.user_agent,
            ip_address: token.ip_address,
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            revoked_at: None,
            revocation_reason: None,
            is_revoked: false,
            created_at: now,
            updated_at: now,
        };
        self.lock().insert(record.id, record.clone());
        Ok(record)
    }

    async fn revoke(&self, hash: &[u8], reason: &str) -> AuthResult<bool> {
        let now = Utc::now();
        let mut records = self.lock();
        let Some(record) = records
            .values_mut()
            .find(|record| record.token_hash == hash)
        else {
            return Ok(false);
        };
        if record.is_revoked {
            return Ok(false);
        }
        record.is_revoked = true;
        record.revoked_at = Some(now);
        record.revocation_reason = Some(reason.to_string());
        record.updated_at = now;
        Ok(true)
    }

    async fn revoke_all(&self, user_id: Uuid, reason: &str) -> AuthResult<u64> {
        let now = Utc::now();
        let mut records = self.lock();
        let mut revoked = 0;
        for record in records
            .values_mut()
            .filter(|record| record.user_id == user_id && !record.is_revoked)
        {
            record.is_revoked = true;
            record.revoked_at = Some(now);
            record.revocation_reason = Some(reason.to_string());
            record.updated_at = now;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn delete_expired(&self) -> AuthResult<u64> {
        let now = Utc::now();
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| !record.is_revoked && !record.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}

/// Spawn the periodic credential sweep.
///
/// Deleting expired and revoked rows off the request path keeps renewals
/// cheap; a failed sweep is logged and retried on the next tick.
pub fn spawn_token_sweeper(store: Arc<dyn CredentialStore>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            match store.delete_expired().await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "swept expired refresh tokens"),
                Err(err) => error!("Failed to sweep refresh tokens: {err}"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn new_token(user_id: Uuid, hash: &[u8], ttl_seconds: i64) -> NewRefreshToken {
        let now = Utc::now();
        NewRefreshToken {
            user_id,
            token_hash: hash.to_vec(),
            jti: Uuid::new_v4(),
            device_fingerprint: None,
            user_agent: Some("renovo-tests".to_string()),
            ip_address: None,
            issued_at: now,
            expires_at: now + ChronoDuration::seconds(ttl_seconds),
        }
    }

    #[tokio::test]
    async fn create_then_find_by_hash_and_jti() {
        let store = MemoryCredentialStore::new();
        let user_id = Uuid::new_v4();
        let record = store
            .create(new_token(user_id, b"hash-1", 60))
            .await
            .expect("create");

        let by_hash = store.find_by_hash(b"hash-1").await.expect("find").expect("present");
        assert_eq!(by_hash.id, record.id);

        let by_jti = store.find_by_jti(record.jti).await.expect("find").expect("present");
        assert_eq!(by_jti.user_id, user_id);
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = MemoryCredentialStore::new();
        store
            .create(new_token(Uuid::new_v4(), b"hash-1", 60))
            .await
            .expect("create");

        assert!(store.revoke(b"hash-1", "rotated").await.expect("revoke"));
        // Second call reports no change and never errors.
        assert!(!store.revoke(b"hash-1", "rotated").await.expect("revoke"));
        assert!(!store.revoke(b"missing", "rotated").await.expect("revoke"));
    }

    #[tokio::test]
    async fn concurrent_revokes_have_exactly_one_winner() {
        let store = Arc::new(MemoryCredentialStore::new());
        store
            .create(new_token(Uuid::new_v4(), b"hash-1", 60))
            .await
            .expect("create");

        let (left, right) = tokio::join!(
            {
                let store = Arc::clone(&store);
                async move { store.revoke(b"hash-1", "rotated").await }
            },
            {
                let store = Arc::clone(&store);
                async move { store.revoke(b"hash-1", "rotated").await }
            }
        );
        let wins = [left.expect("left"), right.expect("right")]
            .iter()
            .filter(|won| **won)
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn revoke_all_counts_only_active_records() {
        let store = MemoryCredentialStore::new();
        let user_id = Uuid::new_v4();
        store.create(new_token(user_id, b"hash-1", 60)).await.expect("create");
        store.create(new_token(user_id, b"hash-2", 60)).await.expect("create");
        store.create(new_token(Uuid::new_v4(), b"hash-3", 60)).await.expect("create");
        store.revoke(b"hash-2", "logout").await.expect("revoke");

        let revoked = store.revoke_all(user_id, "bulk").await.expect("revoke all");
        assert_eq!(revoked, 1);
        assert!(store.find_active(user_id).await.expect("active").is_empty());
    }

    #[tokio::test]
    async fn sweep_deletes_expired_and_revoked() {
        let store = MemoryCredentialStore::new();
        let user_id = Uuid::new_v4();
        store.create(new_token(user_id, b"live", 60)).await.expect("create");
        store.create(new_token(user_id, b"expired", -1)).await.expect("create");
        store.create(new_token(user_id, b"revoked", 60)).await.expect("create");
        store.revoke(b"revoked", "logout").await.expect("revoke");

        let deleted = store.delete_expired().await.expect("sweep");
        assert_eq!(deleted, 2);
        assert!(store.find_by_hash(b"live").await.expect("find").is_some());
        assert!(store.find_by_hash(b"expired").await.expect("find").is_none());
    }
}
