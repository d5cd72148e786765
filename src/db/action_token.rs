//! Action token storage for email verification and password reset.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use super::{store_err, to_sql_time};
use crate::action_token::Purpose;
use crate::repository::{ActionTokenRecord, ActionTokenRepository, StoreError};

#[derive(Clone)]
pub struct ActionTokenStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ActionTokenRow {
    token_hash: Vec<u8>,
    user_id: String,
    purpose: String,
    expires_at: i64,
    consumed_at: Option<i64>,
    created_at: i64,
}

impl TryFrom<ActionTokenRow> for ActionTokenRecord {
    type Error = StoreError;

    fn try_from(row: ActionTokenRow) -> Result<Self, Self::Error> {
        let purpose = Purpose::parse(&row.purpose)
            .ok_or_else(|| StoreError::Hard(format!("unknown token purpose {:?}", row.purpose)))?;
        Ok(Self {
            token_hash: row.token_hash,
            identity_id: row.user_id,
            purpose,
            expires_at: row.expires_at.max(0) as u64,
            consumed_at: row.consumed_at.map(|at| at.max(0) as u64),
            created_at: row.created_at.max(0) as u64,
        })
    }
}

impl ActionTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionTokenRepository for ActionTokenStore {
    async fn insert(&self, record: &ActionTokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO action_tokens (token_hash, user_id, purpose, expires_at, consumed_at, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.token_hash)
        .bind(&record.identity_id)
        .bind(record.purpose.as_str())
        .bind(to_sql_time(record.expires_at))
        .bind(record.consumed_at.map(to_sql_time))
        .bind(to_sql_time(record.created_at))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn consume(
        &self,
        token_hash: &[u8],
        purpose: Purpose,
        now: u64,
    ) -> Result<Option<String>, StoreError> {
        // Single statement: concurrent callers race on the row, one wins.
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE action_tokens SET consumed_at = ?
             WHERE token_hash = ? AND purpose = ? AND consumed_at IS NULL AND expires_at > ?
             RETURNING user_id",
        )
        .bind(to_sql_time(now))
        .bind(token_hash)
        .bind(purpose.as_str())
        .bind(to_sql_time(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(row.map(|r| r.0))
    }

    async fn get(&self, token_hash: &[u8]) -> Result<Option<ActionTokenRecord>, StoreError> {
        let row: Option<ActionTokenRow> = sqlx::query_as(
            "SELECT token_hash, user_id, purpose, expires_at, consumed_at, created_at FROM action_tokens WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(ActionTokenRecord::try_from).transpose()
    }

    async fn release(&self, token_hash: &[u8]) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE action_tokens SET consumed_at = NULL WHERE token_hash = ? AND consumed_at IS NOT NULL",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge(&self, expired_before: u64, consumed_before: u64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM action_tokens WHERE expires_at < ? OR (consumed_at IS NOT NULL AND consumed_at < ?)",
        )
        .bind(to_sql_time(expired_before))
        .bind(to_sql_time(consumed_before))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}
