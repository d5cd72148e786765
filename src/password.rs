//! Password hashing with Argon2id.
//!
//! Digests are PHC strings with the per-call salt embedded, so verification
//! only needs the stored digest and the candidate plaintext.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

/// Digest of a fixed throwaway password. Checked against when a login names an
/// unknown email so both paths cost one Argon2 verification.
const DUMMY_DIGEST: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$ZmFrZWRpZ2VzdGZha2VkaWdlc3RmYWtlZGlnZXN0eHg";

/// Hash a plaintext password.
pub fn hash_password(plaintext: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HashError(e.to_string()))
}

/// Check a plaintext password against a stored digest.
///
/// Returns false for a mismatch and for a digest that cannot be parsed.
pub fn verify_password(digest: &str, plaintext: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(digest) else {
        return false;
    };
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

/// Burn one verification against the dummy digest.
pub fn verify_dummy(plaintext: &str) {
    let _ = verify_password(DUMMY_DIGEST, plaintext);
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(plaintext: String) -> Result<String, HashError> {
    tokio::task::spawn_blocking(move || hash_password(&plaintext))
        .await
        .map_err(|e| HashError(e.to_string()))?
}

/// [`verify_password`] on the blocking pool. Without a digest the dummy
/// digest is checked instead and the result is always false.
pub async fn verify_password_blocking(digest: Option<String>, plaintext: String) -> bool {
    tokio::task::spawn_blocking(move || match digest {
        Some(digest) => verify_password(&digest, &plaintext),
        None => {
            verify_dummy(&plaintext);
            false
        }
    })
    .await
    .unwrap_or(false)
}

/// Hashing failed inside the Argon2 implementation.
#[derive(Debug)]
pub struct HashError(String);

impl std::fmt::Display for HashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to hash password: {}", self.0)
    }
}

impl std::error::Error for HashError {}
