use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use super::{store_err, to_sql_time};
use crate::repository::{Identity, StoreError, UserRepository};
use crate::role::Role;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    uuid: String,
    email: String,
    password_hash: String,
    role: String,
    verified: i32,
    created_at: i64,
}

impl From<UserRow> for Identity {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.uuid,
            email: row.email,
            password_hash: row.password_hash,
            role: Role::parse(&row.role),
            verified: row.verified != 0,
            created_at: row.created_at.max(0) as u64,
        }
    }
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for UserStore {
    async fn create(&self, identity: &Identity) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (uuid, email, password_hash, role, verified, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&identity.id)
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(identity.role.as_str())
        .bind(identity.verified as i32)
        .bind(to_sql_time(identity.created_at))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT uuid, email, password_hash, role, verified, created_at FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(row.map(Identity::from))
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT uuid, email, password_hash, role, verified, created_at FROM users WHERE uuid = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(row.map(Identity::from))
    }

    async fn update_verified(&self, id: &str, verified: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET verified = ? WHERE uuid = ?")
            .bind(verified as i32)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password_hash(&self, id: &str, hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE uuid = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<Identity>, StoreError> {
        let rows: Vec<UserRow> =
            sqlx::query_as("SELECT uuid, email, password_hash, role, verified, created_at FROM users ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(rows.into_iter().map(Identity::from).collect())
    }
}
