//! Authenticated request context.

use crate::role::Role;

/// Who made the request, as established by a valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Token subject
    pub identity_id: String,
    pub role: Role,
}
