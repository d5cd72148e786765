use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;

use super::ApiState;
use super::error::{ApiError, ResultExt};
use crate::auth::{AnyRole, Auth};
use crate::repository::Identity;
use crate::role::Role;

pub fn router(state: ApiState) -> Router {
    Router::new().route("/me", get(me)).with_state(state)
}

/// Public view of an identity. Never includes the password hash.
#[derive(Debug, Clone, Serialize)]
pub(super) struct IdentitySummary {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub verified: bool,
    pub created_at: u64,
}

impl From<Identity> for IdentitySummary {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email,
            role: identity.role,
            verified: identity.verified,
            created_at: identity.created_at,
        }
    }
}

async fn me(
    State(state): State<ApiState>,
    auth: Auth<AnyRole>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .service
        .identity(&auth.identity_id)
        .await
        .api_err("Failed to load identity")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(IdentitySummary::from(identity)))
}
