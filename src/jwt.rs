//! Signed token codec.
//!
//! HS256 JWTs with `iat`/`exp` stamped from an injected [`Clock`]. The codec
//! knows nothing about claim shapes or TTL policy; session tokens layer their
//! own claims on top.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

/// The only algorithm this codec signs with or accepts.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Symmetric key material for one token family.
#[derive(Clone)]
pub struct TokenKey {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenKey {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }
}

/// Caller claims wrapped with the codec-owned timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signed<T> {
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    #[serde(flatten)]
    pub claims: T,
}

/// Issues and verifies signed tokens.
#[derive(Clone)]
pub struct TokenCodec {
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Sign `claims` with `key`, valid for `ttl` from now.
    pub fn issue<T: Serialize>(
        &self,
        claims: &T,
        key: &TokenKey,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let iat = self.clock.now();
        let signed = Signed {
            iat,
            exp: iat.saturating_add(ttl.as_secs()),
            claims,
        };

        jsonwebtoken::encode(&Header::new(SIGNING_ALGORITHM), &signed, &key.encoding_key)
            .map_err(TokenError::Encoding)
    }

    /// Verify signature, algorithm and expiry, and decode the claims.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        key: &TokenKey,
    ) -> Result<Signed<T>, TokenError> {
        // Pin the algorithm before touching the signature.
        let header = jsonwebtoken::decode_header(token).map_err(|_| TokenError::Malformed)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(TokenError::SignatureInvalid);
        }

        // Expiry is checked below against our own clock.
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<Signed<T>>(token, &key.decoding_key, &validation)
            .map_err(TokenError::from_decode)?;

        if self.clock.now() >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}

/// Errors that can occur during token operations.
#[derive(Debug)]
pub enum TokenError {
    /// The token could not be parsed
    Malformed,
    /// MAC mismatch or unexpected signing algorithm
    SignatureInvalid,
    /// The token is at or past its expiry
    Expired,
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
}

impl TokenError {
    fn from_decode(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => TokenError::SignatureInvalid,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        }
    }

    /// Stable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Malformed => "token_malformed",
            TokenError::SignatureInvalid => "signature_invalid",
            TokenError::Expired => "token_expired",
            TokenError::Encoding(_) => "token_encoding",
        }
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "Malformed token"),
            TokenError::SignatureInvalid => write!(f, "Invalid token signature"),
            TokenError::Expired => write!(f, "Token expired"),
            TokenError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
        }
    }
}

impl std::error::Error for TokenError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestClaims {
        sub: String,
        scope: String,
    }

    fn claims() -> TestClaims {
        TestClaims {
            sub: "uuid-123".to_string(),
            scope: "posts".to_string(),
        }
    }

    fn codec_at(now: u64) -> (TokenCodec, ManualClock) {
        let clock = ManualClock::new(now);
        (TokenCodec::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_issue_and_verify() {
        let (codec, _) = codec_at(1_700_000_000);
        let key = TokenKey::new(b"test-secret-key-for-testing");

        let token = codec
            .issue(&claims(), &key, Duration::from_secs(300))
            .unwrap();
        let signed: Signed<TestClaims> = codec.verify(&token, &key).unwrap();

        assert_eq!(signed.claims, claims());
        assert_eq!(signed.iat, 1_700_000_000);
        assert_eq!(signed.exp, 1_700_000_300);
    }

    #[test]
    fn test_wrong_secret() {
        let (codec, _) = codec_at(1_700_000_000);
        let token = codec
            .issue(&claims(), &TokenKey::new(b"secret-1"), Duration::from_secs(300))
            .unwrap();

        let result = codec.verify::<TestClaims>(&token, &TokenKey::new(b"secret-2"));
        assert!(matches!(result, Err(TokenError::SignatureInvalid)));
    }

    #[test]
    fn test_invalid_token() {
        let (codec, _) = codec_at(1_700_000_000);
        let key = TokenKey::new(b"test-secret");

        for garbage in ["", "invalid-token", "a.b.c", "a.b"] {
            let result = codec.verify::<TestClaims>(garbage, &key);
            assert!(
                matches!(result, Err(TokenError::Malformed)),
                "{garbage:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let (codec, _) = codec_at(1_700_000_000);
        let key = TokenKey::new(b"test-secret");

        let token = codec.issue(&claims(), &key, Duration::MAX).unwrap();
        let signed: Signed<TestClaims> = codec.verify(&token, &key).unwrap();
        assert_eq!(signed.exp, u64::MAX);
    }

    #[test]
    fn test_expiry_boundary() {
        let (codec, clock) = codec_at(1_700_000_000);
        let key = TokenKey::new(b"test-secret");
        let token = codec
            .issue(&claims(), &key, Duration::from_secs(60))
            .unwrap();

        clock.advance(Duration::from_secs(59));
        assert!(codec.verify::<TestClaims>(&token, &key).is_ok());

        // Exactly at exp counts as expired.
        clock.advance(Duration::from_secs(1));
        assert!(matches!(
            codec.verify::<TestClaims>(&token, &key),
            Err(TokenError::Expired)
        ));

        clock.advance(Duration::from_secs(3600));
        assert!(matches!(
            codec.verify::<TestClaims>(&token, &key),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let (codec, clock) = codec_at(1_700_000_000);
        let secret = b"test-secret";
        let signed = Signed {
            iat: clock.now(),
            exp: clock.now() + 300,
            claims: claims(),
        };

        // Same secret, different HMAC algorithm.
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &signed,
            &EncodingKey::from_secret(secret),
        )
        .unwrap();

        let result = codec.verify::<TestClaims>(&token, &TokenKey::new(secret));
        assert!(matches!(result, Err(TokenError::SignatureInvalid)));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let (codec, _) = codec_at(1_700_000_000);
        let key = TokenKey::new(b"test-secret");
        let token = codec
            .issue(&claims(), &key, Duration::from_secs(300))
            .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        let payload = String::from_utf8(URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        let forged = URL_SAFE_NO_PAD.encode(payload.replace("uuid-123", "uuid-999"));
        let tampered = format!("{}.{}.{}", parts[0], forged, parts[2]);

        let result = codec.verify::<TestClaims>(&tampered, &key);
        assert!(matches!(result, Err(TokenError::SignatureInvalid)));
    }
}
