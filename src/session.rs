//! Access/refresh token pairs.
//!
//! Both tokens carry the subject and role. They are signed with different
//! secrets, so neither can stand in for the other even before the `typ`
//! claim is looked at.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::jwt::{Signed, TokenCodec, TokenError, TokenKey};
use crate::role::Role;

/// Default access token lifetime: 15 minutes
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Default refresh token lifetime: 7 days
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by both session tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (identity id)
    pub sub: String,
    pub role: Role,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
}

/// A freshly issued access + refresh pair.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues and validates session tokens.
pub struct SessionTokens {
    codec: TokenCodec,
    access_key: TokenKey,
    refresh_key: TokenKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionTokens {
    pub fn new(
        access_secret: &[u8],
        refresh_secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec: TokenCodec::new(clock),
            access_key: TokenKey::new(access_secret),
            refresh_key: TokenKey::new(refresh_secret),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Issue a new access + refresh pair for an identity.
    pub fn issue_pair(&self, identity_id: &str, role: Role) -> Result<SessionPair, SessionError> {
        Ok(SessionPair {
            access_token: self.issue_access(identity_id, role)?,
            refresh_token: self.issue(identity_id, role, TokenType::Refresh)?,
        })
    }

    /// Exchange a refresh token for a new access token.
    /// The refresh token itself is not rotated.
    pub fn refresh(&self, refresh_token: &str) -> Result<String, SessionError> {
        let signed: Signed<SessionClaims> = self
            .codec
            .verify(refresh_token, &self.refresh_key)
            .map_err(|e| {
                tracing::debug!(kind = e.kind(), "Refresh token rejected");
                SessionError::InvalidRefreshToken
            })?;

        if signed.claims.token_type != TokenType::Refresh {
            return Err(SessionError::InvalidRefreshToken);
        }

        self.issue_access(&signed.claims.sub, signed.claims.role)
    }

    /// Validate an access token and return its claims.
    pub fn validate_access(&self, token: &str) -> Result<Signed<SessionClaims>, SessionError> {
        let signed: Signed<SessionClaims> = self
            .codec
            .verify(token, &self.access_key)
            .map_err(SessionError::Token)?;

        if signed.claims.token_type != TokenType::Access {
            return Err(SessionError::WrongTokenType);
        }

        Ok(signed)
    }

    fn issue_access(&self, identity_id: &str, role: Role) -> Result<String, SessionError> {
        self.issue(identity_id, role, TokenType::Access)
    }

    fn issue(
        &self,
        identity_id: &str,
        role: Role,
        token_type: TokenType,
    ) -> Result<String, SessionError> {
        let (key, ttl) = match token_type {
            TokenType::Access => (&self.access_key, self.access_ttl),
            TokenType::Refresh => (&self.refresh_key, self.refresh_ttl),
        };
        let claims = SessionClaims {
            sub: identity_id.to_string(),
            role,
            token_type,
        };
        self.codec
            .issue(&claims, key, ttl)
            .map_err(SessionError::Token)
    }
}

/// Errors from session token operations.
#[derive(Debug)]
pub enum SessionError {
    /// Codec failure on issue or access validation
    Token(TokenError),
    /// A token of the other type was presented
    WrongTokenType,
    /// Refresh token failed any check
    InvalidRefreshToken,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Token(e) => write!(f, "{}", e),
            SessionError::WrongTokenType => write!(f, "Wrong token type"),
            SessionError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const ACCESS: &[u8] = b"access-secret-for-testing-0123456789";
    const REFRESH: &[u8] = b"refresh-secret-for-testing-987654321";

    fn tokens() -> (SessionTokens, ManualClock) {
        let clock = ManualClock::new(1_700_000_000);
        let tokens = SessionTokens::new(
            ACCESS,
            REFRESH,
            Duration::from_secs(15 * 60),
            Duration::from_secs(24 * 60 * 60),
            Arc::new(clock.clone()),
        );
        (tokens, clock)
    }

    #[test]
    fn test_issue_and_validate_access_token() {
        let (tokens, _) = tokens();
        let pair = tokens.issue_pair("uuid-123", Role::Manager).unwrap();

        let signed = tokens.validate_access(&pair.access_token).unwrap();
        assert_eq!(signed.claims.sub, "uuid-123");
        assert_eq!(signed.claims.role, Role::Manager);
        assert_eq!(signed.claims.token_type, TokenType::Access);
        assert_eq!(signed.exp - signed.iat, 15 * 60);
    }

    #[test]
    fn test_tokens_do_not_cross_secrets() {
        let (tokens, clock) = tokens();
        let pair = tokens.issue_pair("uuid-123", Role::User).unwrap();
        let codec = TokenCodec::new(Arc::new(clock));

        let access_as_refresh =
            codec.verify::<SessionClaims>(&pair.access_token, &TokenKey::new(REFRESH));
        assert!(matches!(access_as_refresh, Err(TokenError::SignatureInvalid)));

        let refresh_as_access =
            codec.verify::<SessionClaims>(&pair.refresh_token, &TokenKey::new(ACCESS));
        assert!(matches!(refresh_as_access, Err(TokenError::SignatureInvalid)));

        assert!(matches!(
            tokens.validate_access(&pair.refresh_token),
            Err(SessionError::Token(TokenError::SignatureInvalid))
        ));
    }

    #[test]
    fn test_refresh_reissues_access_only() {
        let (tokens, clock) = tokens();
        let pair = tokens.issue_pair("uuid-123", Role::Admin).unwrap();

        clock.advance(Duration::from_secs(60 * 60));
        assert!(tokens.validate_access(&pair.access_token).is_err());

        let access = tokens.refresh(&pair.refresh_token).unwrap();
        let signed = tokens.validate_access(&access).unwrap();
        assert_eq!(signed.claims.sub, "uuid-123");
        assert_eq!(signed.claims.role, Role::Admin);
    }

    #[test]
    fn test_refresh_rejects_access_token() {
        let (tokens, _) = tokens();
        let pair = tokens.issue_pair("uuid-123", Role::User).unwrap();

        assert!(matches!(
            tokens.refresh(&pair.access_token),
            Err(SessionError::InvalidRefreshToken)
        ));
        assert!(matches!(
            tokens.refresh("garbage"),
            Err(SessionError::InvalidRefreshToken)
        ));
    }

    #[test]
    fn test_refresh_token_expiry() {
        let (tokens, clock) = tokens();
        let pair = tokens.issue_pair("uuid-123", Role::User).unwrap();

        clock.advance(Duration::from_secs(24 * 60 * 60));
        assert!(matches!(
            tokens.refresh(&pair.refresh_token),
            Err(SessionError::InvalidRefreshToken)
        ));
    }

    #[test]
    fn test_same_secret_wrong_type_rejected() {
        let clock = ManualClock::new(1_700_000_000);
        let tokens = SessionTokens::new(
            ACCESS,
            ACCESS,
            Duration::from_secs(60),
            Duration::from_secs(120),
            Arc::new(clock),
        );
        let pair = tokens.issue_pair("uuid-123", Role::User).unwrap();

        assert!(matches!(
            tokens.validate_access(&pair.refresh_token),
            Err(SessionError::WrongTokenType)
        ));
        assert!(matches!(
            tokens.refresh(&pair.access_token),
            Err(SessionError::InvalidRefreshToken)
        ));
    }
}
