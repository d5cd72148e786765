//! Identity roles.

use serde::{Deserialize, Serialize};

/// User role for authorization. Variants are declared lowest first, so the
/// derived ordering is the privilege order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    /// Parse a stored role. Unknown values fall back to the least privileged role.
    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Role::User,
            "manager" => Role::Manager,
            "admin" => Role::Admin,
            _ => Role::Guest,
        }
    }

    /// Whether this role meets or exceeds `required`.
    pub fn satisfies(&self, required: Role) -> bool {
        *self >= required
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
