mod action_token;
mod user;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::repository::StoreError;

pub use action_token::ActionTokenStore;
pub use user::UserStore;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                // Users table
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'user',
                    verified INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_users_uuid ON users(uuid)",
                "CREATE INDEX idx_users_email ON users(email)",
                // Action tokens: only the SHA-256 of the raw token is stored
                "CREATE TABLE action_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    token_hash BLOB UNIQUE NOT NULL,
                    user_id TEXT NOT NULL REFERENCES users(uuid) ON DELETE CASCADE,
                    purpose TEXT NOT NULL,
                    expires_at INTEGER NOT NULL,
                    consumed_at INTEGER,
                    created_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_action_tokens_user_id ON action_tokens(user_id)",
                "CREATE INDEX idx_action_tokens_expires_at ON action_tokens(expires_at)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the action token store.
    pub fn action_tokens(&self) -> ActionTokenStore {
        ActionTokenStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// SQLite primary result codes worth retrying.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Unix seconds as stored by SQLite. Times past `i64::MAX` clamp to it.
pub(crate) fn to_sql_time(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Classify a driver error for the store layer.
pub(crate) fn store_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Duplicate,
        sqlx::Error::Database(db_err) => {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            match primary {
                Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => StoreError::Transient(err.to_string()),
                _ => StoreError::Hard(err.to_string()),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Hard(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_token::Purpose;
    use crate::repository::{
        ActionTokenRecord, ActionTokenRepository, Identity, UserRepository,
    };
    use crate::role::Role;
    use std::sync::Arc;

    fn identity(id: &str, email: &str) -> Identity {
        Identity {
            id: id.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: Role::User,
            verified: false,
            created_at: 1_700_000_000,
        }
    }

    fn record(hash: &[u8], user: &str, purpose: Purpose, expires_at: u64) -> ActionTokenRecord {
        ActionTokenRecord {
            token_hash: hash.to_vec(),
            identity_id: user.to_string(),
            purpose,
            expires_at,
            consumed_at: None,
            created_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        users
            .create(&identity("uuid-123", "alice@example.com"))
            .await
            .unwrap();

        let user = users
            .get_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, "uuid-123");
        assert_eq!(user.role, Role::User);
        assert!(!user.verified);
        assert_eq!(user.created_at, 1_700_000_000);

        let user = users.get_by_id("uuid-123").await.unwrap().unwrap();
        assert_eq!(user.email, "alice@example.com");

        assert!(users.get_by_id("uuid-999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_fails() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        users
            .create(&identity("uuid-1", "alice@example.com"))
            .await
            .unwrap();
        let result = users.create(&identity("uuid-2", "Alice@Example.com")).await;

        assert_eq!(result, Err(StoreError::Duplicate));
    }

    #[tokio::test]
    async fn test_update_user() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();
        users
            .create(&identity("uuid-1", "alice@example.com"))
            .await
            .unwrap();

        assert!(users.update_verified("uuid-1", true).await.unwrap());
        assert!(users.update_password_hash("uuid-1", "new").await.unwrap());
        assert!(!users.update_verified("uuid-2", true).await.unwrap());

        let user = users.get_by_id("uuid-1").await.unwrap().unwrap();
        assert!(user.verified);
        assert_eq!(user.password_hash, "new");
    }

    #[tokio::test]
    async fn test_far_future_expiry_stays_valid() {
        let db = Database::open(":memory:").await.unwrap();
        db.users()
            .create(&identity("uuid-1", "alice@example.com"))
            .await
            .unwrap();
        let tokens = db.action_tokens();
        tokens
            .insert(&record(b"h1", "uuid-1", Purpose::VerifyEmail, u64::MAX))
            .await
            .unwrap();

        assert_eq!(
            tokens
                .consume(b"h1", Purpose::VerifyEmail, 1_700_000_100)
                .await
                .unwrap(),
            Some("uuid-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_release_reopens_consumed_token() {
        let db = Database::open(":memory:").await.unwrap();
        db.users()
            .create(&identity("uuid-1", "alice@example.com"))
            .await
            .unwrap();
        let tokens = db.action_tokens();
        tokens
            .insert(&record(b"h1", "uuid-1", Purpose::ResetPassword, 1_700_003_600))
            .await
            .unwrap();

        // Nothing to release before a consume.
        assert!(!tokens.release(b"h1").await.unwrap());

        tokens
            .consume(b"h1", Purpose::ResetPassword, 1_700_000_100)
            .await
            .unwrap();
        assert!(tokens.release(b"h1").await.unwrap());
        assert_eq!(tokens.get(b"h1").await.unwrap().unwrap().consumed_at, None);

        assert_eq!(
            tokens
                .consume(b"h1", Purpose::ResetPassword, 1_700_000_200)
                .await
                .unwrap(),
            Some("uuid-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_consume_is_conditional() {
        let db = Database::open(":memory:").await.unwrap();
        db.users()
            .create(&identity("uuid-1", "alice@example.com"))
            .await
            .unwrap();
        let tokens = db.action_tokens();
        tokens
            .insert(&record(b"h1", "uuid-1", Purpose::VerifyEmail, 1_700_003_600))
            .await
            .unwrap();

        // Wrong purpose leaves the record untouched.
        assert_eq!(
            tokens
                .consume(b"h1", Purpose::ResetPassword, 1_700_000_100)
                .await
                .unwrap(),
            None
        );
        // Expired at exactly expires_at.
        assert_eq!(
            tokens
                .consume(b"h1", Purpose::VerifyEmail, 1_700_003_600)
                .await
                .unwrap(),
            None
        );

        assert_eq!(
            tokens
                .consume(b"h1", Purpose::VerifyEmail, 1_700_000_100)
                .await
                .unwrap(),
            Some("uuid-1".to_string())
        );
        assert_eq!(
            tokens
                .consume(b"h1", Purpose::VerifyEmail, 1_700_000_200)
                .await
                .unwrap(),
            None
        );

        let stored = tokens.get(b"h1").await.unwrap().unwrap();
        assert_eq!(stored.consumed_at, Some(1_700_000_100));
        assert_eq!(stored.purpose, Purpose::VerifyEmail);
    }

    #[tokio::test]
    async fn test_purge_tokens() {
        let db = Database::open(":memory:").await.unwrap();
        db.users()
            .create(&identity("uuid-1", "alice@example.com"))
            .await
            .unwrap();
        let tokens = db.action_tokens();
        tokens
            .insert(&record(b"expired", "uuid-1", Purpose::VerifyEmail, 100))
            .await
            .unwrap();
        tokens
            .insert(&record(b"live", "uuid-1", Purpose::VerifyEmail, 10_000))
            .await
            .unwrap();
        tokens
            .insert(&record(b"used", "uuid-1", Purpose::ResetPassword, 10_000))
            .await
            .unwrap();
        tokens
            .consume(b"used", Purpose::ResetPassword, 50)
            .await
            .unwrap();

        let removed = tokens.purge(200, 60).await.unwrap();
        assert_eq!(removed, 2);
        assert!(tokens.get(b"live").await.unwrap().is_some());
        assert!(tokens.get(b"used").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.users()
            .create(&identity("uuid-1", "alice@example.com"))
            .await
            .unwrap();
        let tokens = Arc::new(db.action_tokens());
        tokens
            .insert(&record(b"h1", "uuid-1", Purpose::ResetPassword, 1_700_003_600))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tokens = tokens.clone();
                tokio::spawn(async move {
                    tokens
                        .consume(b"h1", Purpose::ResetPassword, 1_700_000_100)
                        .await
                })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.db");
        let path = path.to_str().unwrap();

        let db = Database::open(path).await.unwrap();
        db.users()
            .create(&identity("uuid-1", "alice@example.com"))
            .await
            .unwrap();
        drop(db);

        let db = Database::open(path).await.unwrap();
        assert_eq!(db.users().list().await.unwrap().len(), 1);
    }
}
