//! Identity directory lookups.
//!
//! Identities are owned by the user-directory side of the platform; this
//! subsystem only reads the fields it needs for authentication and never
//! mutates them.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::error::AuthResult;

/// The slice of an account this subsystem reads.
#[derive(Clone, Debug)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub password_hash: String,
    pub two_factor_enabled: bool,
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>>;
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>>;
}

pub struct PgIdentityDirectory {
    pool: PgPool,
}

impl PgIdentityDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn identity_from_row(row: &sqlx::postgres::PgRow) -> Identity {
    Identity {
        id: row.get("id"),
        email: row.get("email"),
        role: row.get("role"),
        password_hash: row.get("password_hash"),
        two_factor_enabled: row.get("two_factor_enabled"),
    }
}

#[async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        // Only active accounts can authenticate.
        let query = r"
            SELECT id, email, role, password_hash, two_factor_enabled
            FROM users
            WHERE email = $1
              AND is_active
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(identity_from_row))
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>> {
        let query = r"
            SELECT id, email, role, password_hash, two_factor_enabled
            FROM users
            WHERE id = $1
              AND is_active
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        Ok(row.as_ref().map(identity_from_row))
    }
}

/// In-memory directory used by tests and local wiring.
#[derive(Clone, Debug, Default)]
pub struct MemoryIdentityDirectory {
    users: Vec<Identity>,
}

impl MemoryIdentityDirectory {
    #[must_use]
    pub fn with_users(users: Vec<Identity>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl IdentityDirectory for MemoryIdentityDirectory {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        Ok(self.users.iter().find(|user| user.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>> {
        Ok(self.users.iter().find(|user| user.id == id).cloned())
    }
}
