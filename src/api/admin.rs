//! Admin API endpoints.
//!
//! All endpoints require admin role.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};

use super::ApiState;
use super::error::{ApiError, ResultExt};
use super::me::IdentitySummary;
use crate::auth::{AdminOnly, Auth};

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .with_state(state)
}

/// List all users.
async fn list_users(
    State(state): State<ApiState>,
    _auth: Auth<AdminOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let users: Vec<IdentitySummary> = state
        .service
        .list_identities()
        .await
        .api_err("Failed to list users")?
        .into_iter()
        .map(IdentitySummary::from)
        .collect();

    Ok(Json(users))
}
