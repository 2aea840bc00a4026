//! Per-identity failed-attempt counters and lockout windows.
//!
//! The guard holds an explicitly injected keyed store rather than
//! process-wide static state, so it can be backed by Postgres in production
//! and by a mutexed map in tests. Counter arithmetic happens inside the
//! store in a single atomic step; concurrent failed logins for the same
//! identity can never under-count.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::Instrument;

use super::error::AuthResult;

/// Counter row as stored, keyed by normalized email.
#[derive(Clone, Copy, Debug)]
pub struct CounterSnapshot {
    pub failed_attempts: u32,
    pub window_started_at: DateTime<Utc>,
    pub lockout_until: Option<DateTime<Utc>>,
}

/// What the caller needs to gate a login attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutStatus {
    pub allowed: bool,
    pub remaining_attempts: u32,
    pub lockout_until: Option<DateTime<Utc>>,
}

/// Keyed store for lockout counters.
///
/// `record_failure` must be atomic: one conditional update that resets an
/// elapsed window, increments, and arms the lockout in the same step.
#[async_trait]
pub trait LockoutStore: Send + Sync {
    async fn fetch(&self, key: &str) -> AuthResult<Option<CounterSnapshot>>;
    async fn record_failure(
        &self,
        key: &str,
        max_attempts: u32,
        lockout: Duration,
    ) -> AuthResult<CounterSnapshot>;
    async fn reset(&self, key: &str) -> AuthResult<()>;
}

pub struct LockoutGuard {
    store: Arc<dyn LockoutStore>,
    max_attempts: u32,
    lockout: Duration,
}

impl LockoutGuard {
    #[must_use]
    pub fn new(store: Arc<dyn LockoutStore>, max_attempts: u32, lockout: Duration) -> Self {
        Self {
            store,
            max_attempts,
            lockout,
        }
    }

    /// Read-only gate. Locked vs expired-lockout is re-derived from the
    /// stored `lockout_until` on every call, never from a cached flag.
    pub async fn check(&self, key: &str) -> AuthResult<LockoutStatus> {
        let snapshot = self.store.fetch(key).await?;
        Ok(self.status_from(snapshot, Utc::now()))
    }

    /// Record one failed attempt and return the post-increment status.
    pub async fn record_failure(&self, key: &str) -> AuthResult<LockoutStatus> {
        let snapshot = self
            .store
            .record_failure(key, self.max_attempts, self.lockout)
            .await?;
        Ok(self.status_from(Some(snapshot), Utc::now()))
    }

    pub async fn reset(&self, key: &str) -> AuthResult<()> {
        self.store.reset(key).await
    }

    fn status_from(&self, snapshot: Option<CounterSnapshot>, now: DateTime<Utc>) -> LockoutStatus {
        let Some(snapshot) = snapshot else {
            return LockoutStatus {
                allowed: true,
                remaining_attempts: self.max_attempts,
                lockout_until: None,
            };
        };

        match snapshot.lockout_until {
            Some(until) if until > now => LockoutStatus {
                allowed: false,
                remaining_attempts: 0,
                lockout_until: Some(until),
            },
            // An elapsed lockout reads as a clean slate; the counter itself
            // is reset by the next success or failure.
            Some(_) => LockoutStatus {
                allowed: true,
                remaining_attempts: self.max_attempts,
                lockout_until: None,
            },
            None => LockoutStatus {
                allowed: true,
                remaining_attempts: self.max_attempts.saturating_sub(snapshot.failed_attempts),
                lockout_until: None,
            },
        }
    }
}

pub struct PgLockoutStore {
    pool: PgPool,
}

impl PgLockoutStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> CounterSnapshot {
    CounterSnapshot {
        failed_attempts: u32::try_from(row.get::<i32, _>("failed_attempts")).unwrap_or(0),
        window_started_at: row.get("window_started_at"),
        lockout_until: row.get("lockout_until"),
    }
}

#[async_trait]
impl LockoutStore for PgLockoutStore {
    async fn fetch(&self, key: &str) -> AuthResult<Option<CounterSnapshot>> {
        let query = r"
            SELECT failed_attempts, window_started_at, lockout_until
            FROM login_attempts
            WHERE email = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(snapshot_from_row))
    }

    async fn record_failure(
        &self,
        key: &str,
        max_attempts: u32,
        lockout: Duration,
    ) -> AuthResult<CounterSnapshot> {
        // Single atomic upsert: an elapsed lockout restarts the run at 1,
        // otherwise the counter increments, and the lockout arms exactly when
        // the new count reaches the maximum. An active lockout is never
        // extended here; callers short-circuit on `check` before comparing
        // passwords, so this path is unreachable while locked anyway.
        let query = r"
            INSERT INTO login_attempts (email, failed_attempts, window_started_at, lockout_until)
            VALUES (
                $1, 1, NOW(),
                CASE WHEN 1 >= $2 THEN NOW() + ($3 * INTERVAL '1 second') END
            )
            ON CONFLICT (email) DO UPDATE SET
                failed_attempts = CASE
                    WHEN login_attempts.lockout_until IS NOT NULL
                         AND login_attempts.lockout_until <= NOW() THEN 1
                    ELSE login_attempts.failed_attempts + 1
                END,
                window_started_at = CASE
                    WHEN login_attempts.lockout_until IS NOT NULL
                         AND login_attempts.lockout_until <= NOW() THEN NOW()
                    ELSE login_attempts.window_started_at
                END,
                lockout_until = CASE
                    WHEN login_attempts.lockout_until IS NOT NULL
                         AND login_attempts.lockout_until > NOW() THEN login_attempts.lockout_until
                    WHEN login_attempts.lockout_until IS NOT NULL
                         AND login_attempts.lockout_until <= NOW() THEN
                        CASE WHEN 1 >= $2 THEN NOW() + ($3 * INTERVAL '1 second') END
                    WHEN login_attempts.failed_attempts + 1 >= $2 THEN
                        NOW() + ($3 * INTERVAL '1 second')
                END
            RETURNING failed_attempts, window_started_at, lockout_until
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
            .bind(lockout.num_seconds())
            .fetch_one(&self.pool)
            .instrument(span)
            .await?;
        Ok(snapshot_from_row(&row))
    }

    async fn reset(&self, key: &str) -> AuthResult<()> {
        // Reset is idempotent; a missing row is already reset.
        let query = r"
            UPDATE login_attempts
            SET failed_attempts = 0, lockout_until = NULL
            WHERE email = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

/// Mutexed map store for tests and single-process deployments.
/// The whole read-modify-write runs under one lock acquisition, matching the
/// atomicity the Postgres store gets from its single-statement upsert.
#[derive(Default)]
pub struct MemoryLockoutStore {
    counters: Mutex<HashMap<String, CounterSnapshot>>,
}

impl MemoryLockoutStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockoutStore for MemoryLockoutStore {
    async fn fetch(&self, key: &str) -> AuthResult<Option<CounterSnapshot>> {
        let counters = self.counters.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(counters.get(key).copied())
    }

    async fn record_failure(
        &self,
        key: &str,
        max_attempts: u32,
        lockout: Duration,
    ) -> AuthResult<CounterSnapshot> {
        let now = Utc::now();
        let mut counters = self.counters.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = counters.entry(key.to_string()).or_insert(CounterSnapshot {
            failed_attempts: 0,
            window_started_at: now,
            lockout_until: None,
        });

        match entry.lockout_until {
            // Active lockouts are never re-armed.
            Some(until) if until > now => {}
            Some(_) => {
                entry.failed_attempts = 1;
                entry.window_started_at = now;
                entry.lockout_until = if 1 >= max_attempts {
                    Some(now + lockout)
                } else {
                    None
                };
            }
            None => {
                entry.failed_attempts += 1;
                if entry.failed_attempts >= max_attempts {
                    entry.lockout_until = Some(now + lockout);
                }
            }
        }
        Ok(*entry)
    }

    async fn reset(&self, key: &str) -> AuthResult<()> {
        let mut counters = self.counters.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = counters.get_mut(key) {
            entry.failed_attempts = 0;
            entry.lockout_until = None;
        }
        Ok(())
    }
}
