//! Error taxonomy of the auth service.
//!
//! Component errors ([`TokenError`], [`SessionError`], [`ActionTokenError`],
//! [`StoreError`], [`MailError`], [`HashError`]) fold into [`AuthError`],
//! which callers branch on by variant. [`AuthError::kind`] is what gets logged.

use crate::action_token::ActionTokenError;
use crate::jwt::TokenError;
use crate::mail::MailError;
use crate::password::HashError;
use crate::repository::StoreError;
use crate::session::SessionError;

#[derive(Debug)]
pub enum AuthError {
    /// Unknown email or wrong password. Deliberately not distinguished.
    CredentialInvalid,
    EmailTaken,
    AccountUnverified,
    /// Request body failed validation
    InvalidInput(String),
    TokenExpired,
    TokenMalformed,
    SignatureInvalid,
    PurposeMismatch,
    TokenAlreadyUsed,
    TokenNotFound,
    InvalidRefreshToken,
    InsufficientRole,
    MailDelivery(MailError),
    /// Store failure worth retrying by the caller
    Transient(String),
    Hard(String),
    Hashing(HashError),
}

impl AuthError {
    /// Stable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::CredentialInvalid => "credential_invalid",
            AuthError::EmailTaken => "email_taken",
            AuthError::AccountUnverified => "account_unverified",
            AuthError::InvalidInput(_) => "invalid_input",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenMalformed => "token_malformed",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::PurposeMismatch => "purpose_mismatch",
            AuthError::TokenAlreadyUsed => "token_already_used",
            AuthError::TokenNotFound => "token_not_found",
            AuthError::InvalidRefreshToken => "invalid_refresh_token",
            AuthError::InsufficientRole => "insufficient_role",
            AuthError::MailDelivery(_) => "mail_delivery",
            AuthError::Transient(_) => "store_transient",
            AuthError::Hard(_) => "store_hard",
            AuthError::Hashing(_) => "hashing",
        }
    }

    /// Whether the failure came from an action token check.
    pub fn is_action_token_failure(&self) -> bool {
        matches!(
            self,
            AuthError::TokenExpired
                | AuthError::PurposeMismatch
                | AuthError::TokenAlreadyUsed
                | AuthError::TokenNotFound
        )
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::CredentialInvalid => write!(f, "Invalid email or password"),
            AuthError::EmailTaken => write!(f, "Email already registered"),
            AuthError::AccountUnverified => write!(f, "Email address not verified"),
            AuthError::InvalidInput(msg) => write!(f, "{}", msg),
            AuthError::TokenExpired => write!(f, "Token expired"),
            AuthError::TokenMalformed => write!(f, "Malformed token"),
            AuthError::SignatureInvalid => write!(f, "Invalid token signature"),
            AuthError::PurposeMismatch => write!(f, "Token purpose mismatch"),
            AuthError::TokenAlreadyUsed => write!(f, "Token already used"),
            AuthError::TokenNotFound => write!(f, "Token not found"),
            AuthError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
            AuthError::InsufficientRole => write!(f, "Insufficient permissions"),
            AuthError::MailDelivery(e) => write!(f, "{}", e),
            AuthError::Transient(msg) => write!(f, "Temporary store failure: {}", msg),
            AuthError::Hard(msg) => write!(f, "Store failure: {}", msg),
            AuthError::Hashing(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) => AuthError::Transient(msg),
            StoreError::Hard(msg) => AuthError::Hard(msg),
            StoreError::Duplicate => AuthError::EmailTaken,
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => AuthError::TokenMalformed,
            TokenError::SignatureInvalid => AuthError::SignatureInvalid,
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::Encoding(e) => AuthError::Hard(e.to_string()),
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Token(e) => e.into(),
            SessionError::WrongTokenType => AuthError::TokenMalformed,
            SessionError::InvalidRefreshToken => AuthError::InvalidRefreshToken,
        }
    }
}

impl From<ActionTokenError> for AuthError {
    fn from(err: ActionTokenError) -> Self {
        match err {
            ActionTokenError::NotFound => AuthError::TokenNotFound,
            ActionTokenError::Expired => AuthError::TokenExpired,
            ActionTokenError::PurposeMismatch => AuthError::PurposeMismatch,
            ActionTokenError::AlreadyUsed => AuthError::TokenAlreadyUsed,
            ActionTokenError::Store(e) => e.into(),
        }
    }
}

impl From<MailError> for AuthError {
    fn from(err: MailError) -> Self {
        AuthError::MailDelivery(err)
    }
}

impl From<HashError> for AuthError {
    fn from(err: HashError) -> Self {
        AuthError::Hashing(err)
    }
}
