//! Single-use, purpose-scoped tokens for email verification and password reset.
//!
//! The raw token is 32 random bytes, base64url encoded, and only ever leaves
//! the process inside a mailed link. The store keeps its SHA-256. Consumption
//! is one conditional update in the store; the record is only read afterwards
//! to explain why a consume did not go through.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::repository::{ActionTokenRecord, ActionTokenRepository, StoreError, within};

/// Number of random bytes in a raw action token.
const TOKEN_BYTES: usize = 32;

/// What an action token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    VerifyEmail,
    ResetPassword,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::VerifyEmail => "verify-email",
            Purpose::ResetPassword => "reset-password",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verify-email" => Some(Purpose::VerifyEmail),
            "reset-password" => Some(Purpose::ResetPassword),
            _ => None,
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hash a raw token for storage and lookup.
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Issues and consumes action tokens against a persistent store.
pub struct ActionTokens {
    store: Arc<dyn ActionTokenRepository>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl ActionTokens {
    pub fn new(
        store: Arc<dyn ActionTokenRepository>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            store_timeout,
        }
    }

    /// Issue a token for `identity_id` and record it. Returns the raw token.
    pub async fn issue(
        &self,
        identity_id: &str,
        purpose: Purpose,
        ttl: Duration,
    ) -> Result<String, ActionTokenError> {
        let token = generate_token();
        let now = self.clock.now();
        let record = ActionTokenRecord {
            token_hash: hash_token(&token),
            identity_id: identity_id.to_string(),
            purpose,
            expires_at: now.saturating_add(ttl.as_secs()),
            consumed_at: None,
            created_at: now,
        };

        within(self.store_timeout, self.store.insert(&record)).await?;
        info!(identity_id = %identity_id, purpose = %purpose, "Action token issued");

        Ok(token)
    }

    /// Use a token for `expected_purpose`. Succeeds at most once per token.
    pub async fn consume(
        &self,
        token: &str,
        expected_purpose: Purpose,
    ) -> Result<String, ActionTokenError> {
        let token_hash = hash_token(token);
        let now = self.clock.now();

        if let Some(identity_id) = within(
            self.store_timeout,
            self.store.consume(&token_hash, expected_purpose, now),
        )
        .await?
        {
            info!(identity_id = %identity_id, purpose = %expected_purpose, "Action token consumed");
            return Ok(identity_id);
        }

        let record = within(self.store_timeout, self.store.get(&token_hash)).await?;
        let err = classify_failure(record.as_ref(), expected_purpose, now);
        debug!(purpose = %expected_purpose, kind = err.kind(), "Action token rejected");
        Err(err)
    }

    /// Make a consumed token usable again. Only the caller that won
    /// [`consume`](Self::consume) may do this, and only when the effect the
    /// token stood for was not applied.
    pub async fn release(&self, token: &str) -> Result<bool, ActionTokenError> {
        let token_hash = hash_token(token);
        let released = within(self.store_timeout, self.store.release(&token_hash)).await?;
        if released {
            info!("Action token released");
        }
        Ok(released)
    }
}

/// Explain why a conditional consume did not match.
fn classify_failure(
    record: Option<&ActionTokenRecord>,
    expected_purpose: Purpose,
    now: u64,
) -> ActionTokenError {
    let Some(record) = record else {
        return ActionTokenError::NotFound;
    };
    if now >= record.expires_at {
        ActionTokenError::Expired
    } else if record.purpose != expected_purpose {
        ActionTokenError::PurposeMismatch
    } else {
        // Present, live and the right purpose: someone consumed it first.
        ActionTokenError::AlreadyUsed
    }
}

/// Errors from action token operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTokenError {
    NotFound,
    Expired,
    PurposeMismatch,
    AlreadyUsed,
    Store(StoreError),
}

impl ActionTokenError {
    /// Stable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionTokenError::NotFound => "token_not_found",
            ActionTokenError::Expired => "token_expired",
            ActionTokenError::PurposeMismatch => "purpose_mismatch",
            ActionTokenError::AlreadyUsed => "token_already_used",
            ActionTokenError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for ActionTokenError {
    fn from(err: StoreError) -> Self {
        ActionTokenError::Store(err)
    }
}

impl std::fmt::Display for ActionTokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionTokenError::NotFound => write!(f, "Token not found"),
            ActionTokenError::Expired => write!(f, "Token expired"),
            ActionTokenError::PurposeMismatch => write!(f, "Token purpose mismatch"),
            ActionTokenError::AlreadyUsed => write!(f, "Token already used"),
            ActionTokenError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ActionTokenError {}
