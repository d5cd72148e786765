//! Storage contracts the auth core depends on.
//!
//! The core never reaches for a global connection. Managers and the service
//! are handed an `Arc<dyn ...Repository>` at construction: the SQLite stores
//! in [`crate::db`] in production, the in-memory ones in [`memory`] for tests.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::action_token::Purpose;
use crate::role::Role;

/// A stored user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Public identifier (UUID), used as the token subject
    pub id: String,
    /// Normalized email address, unique
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub verified: bool,
    /// Creation time (Unix timestamp)
    pub created_at: u64,
}

/// A persisted action token. Only the SHA-256 of the raw token is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTokenRecord {
    pub token_hash: Vec<u8>,
    pub identity_id: String,
    pub purpose: Purpose,
    /// Expiration time (Unix timestamp)
    pub expires_at: u64,
    /// When the token was used, if it has been
    pub consumed_at: Option<u64>,
    pub created_at: u64,
}

/// User-record store.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new identity. Fails with [`StoreError::Duplicate`] if the email is taken.
    async fn create(&self, identity: &Identity) -> Result<(), StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError>;

    /// Returns false if no identity has this id.
    async fn update_verified(&self, id: &str, verified: bool) -> Result<bool, StoreError>;

    /// Returns false if no identity has this id.
    async fn update_password_hash(&self, id: &str, hash: &str) -> Result<bool, StoreError>;

    /// All identities, oldest first.
    async fn list(&self) -> Result<Vec<Identity>, StoreError>;
}

/// Action-token store.
#[async_trait]
pub trait ActionTokenRepository: Send + Sync {
    async fn insert(&self, record: &ActionTokenRecord) -> Result<(), StoreError>;

    /// Atomically mark the token consumed if it exists, has `purpose`, is not
    /// consumed and `now < expires_at`. Returns the bound identity id when
    /// this call performed the transition, `None` otherwise.
    async fn consume(
        &self,
        token_hash: &[u8],
        purpose: Purpose,
        now: u64,
    ) -> Result<Option<String>, StoreError>;

    async fn get(&self, token_hash: &[u8]) -> Result<Option<ActionTokenRecord>, StoreError>;

    /// Undo a consume whose follow-up write failed. Returns whether a consumed
    /// record was reopened.
    async fn release(&self, token_hash: &[u8]) -> Result<bool, StoreError>;

    /// Delete tokens that expired before `expired_before` or were consumed
    /// before `consumed_before`. Returns the number of rows removed.
    async fn purge(&self, expired_before: u64, consumed_before: u64) -> Result<u64, StoreError>;
}

/// Store-layer failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Worth retrying: timeouts, pool exhaustion, lock contention
    Transient(String),
    /// Not worth retrying
    Hard(String),
    /// Unique constraint violated
    Duplicate,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Transient(msg) => write!(f, "Transient store error: {}", msg),
            StoreError::Hard(msg) => write!(f, "Store error: {}", msg),
            StoreError::Duplicate => write!(f, "Duplicate record"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Run a store call under a deadline. Running out of time is transient.
pub async fn within<T, F>(deadline: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| StoreError::Transient("deadline exceeded".to_string()))?
}

/// In-process stores. Atomicity holds within one process only.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryUserRepository {
        users: Mutex<Vec<Identity>>,
    }

    impl MemoryUserRepository {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl UserRepository for MemoryUserRepository {
        async fn create(&self, identity: &Identity) -> Result<(), StoreError> {
            let mut users = self.users.lock().map_err(poisoned)?;
            if users
                .iter()
                .any(|u| u.email.eq_ignore_ascii_case(&identity.email) || u.id == identity.id)
            {
                return Err(StoreError::Duplicate);
            }
            users.push(identity.clone());
            Ok(())
        }

        async fn get_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
            let users = self.users.lock().map_err(poisoned)?;
            Ok(users
                .iter()
                .find(|u| u.email.eq_ignore_ascii_case(email))
                .cloned())
        }

        async fn get_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError> {
            let users = self.users.lock().map_err(poisoned)?;
            Ok(users.iter().find(|u| u.id == id).cloned())
        }

        async fn update_verified(&self, id: &str, verified: bool) -> Result<bool, StoreError> {
            let mut users = self.users.lock().map_err(poisoned)?;
            Ok(match users.iter_mut().find(|u| u.id == id) {
                Some(user) => {
                    user.verified = verified;
                    true
                }
                None => false,
            })
        }

        async fn update_password_hash(&self, id: &str, hash: &str) -> Result<bool, StoreError> {
            let mut users = self.users.lock().map_err(poisoned)?;
            Ok(match users.iter_mut().find(|u| u.id == id) {
                Some(user) => {
                    user.password_hash = hash.to_string();
                    true
                }
                None => false,
            })
        }

        async fn list(&self) -> Result<Vec<Identity>, StoreError> {
            Ok(self.users.lock().map_err(poisoned)?.clone())
        }
    }

    #[derive(Default)]
    pub struct MemoryActionTokenRepository {
        tokens: Mutex<HashMap<Vec<u8>, ActionTokenRecord>>,
    }

    impl MemoryActionTokenRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.tokens.lock().map(|t| t.len()).unwrap_or_default()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl ActionTokenRepository for MemoryActionTokenRepository {
        async fn insert(&self, record: &ActionTokenRecord) -> Result<(), StoreError> {
            let mut tokens = self.tokens.lock().map_err(poisoned)?;
            if tokens.contains_key(&record.token_hash) {
                return Err(StoreError::Duplicate);
            }
            tokens.insert(record.token_hash.clone(), record.clone());
            Ok(())
        }

        async fn consume(
            &self,
            token_hash: &[u8],
            purpose: Purpose,
            now: u64,
        ) -> Result<Option<String>, StoreError> {
            // Lookup and mark under one lock.
            let mut tokens = self.tokens.lock().map_err(poisoned)?;
            match tokens.get_mut(token_hash) {
                Some(record)
                    if record.purpose == purpose
                        && record.consumed_at.is_none()
                        && now < record.expires_at =>
                {
                    record.consumed_at = Some(now);
                    Ok(Some(record.identity_id.clone()))
                }
                _ => Ok(None),
            }
        }

        async fn get(&self, token_hash: &[u8]) -> Result<Option<ActionTokenRecord>, StoreError> {
            let tokens = self.tokens.lock().map_err(poisoned)?;
            Ok(tokens.get(token_hash).cloned())
        }

        async fn release(&self, token_hash: &[u8]) -> Result<bool, StoreError> {
            let mut tokens = self.tokens.lock().map_err(poisoned)?;
            match tokens.get_mut(token_hash) {
                Some(record) if record.consumed_at.is_some() => {
                    record.consumed_at = None;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn purge(
            &self,
            expired_before: u64,
            consumed_before: u64,
        ) -> Result<u64, StoreError> {
            let mut tokens = self.tokens.lock().map_err(poisoned)?;
            let before = tokens.len();
            tokens.retain(|_, t| {
                t.expires_at >= expired_before
                    && t.consumed_at.is_none_or(|at| at >= consumed_before)
            });
            Ok((before - tokens.len()) as u64)
        }
    }

    fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
        StoreError::Hard("lock poisoned".to_string())
    }
}
