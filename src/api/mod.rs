mod admin;
mod auth;
mod error;
mod me;

use axum::Router;
use std::sync::Arc;

use crate::impl_has_auth_backend;
use crate::rate_limit::RateLimitConfig;
use crate::service::AuthService;
use crate::session::SessionTokens;

pub use error::{ApiError, INVALID_ACTION_TOKEN, INVALID_REFRESH_TOKEN};

/// State shared by all API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<AuthService>,
    pub sessions: Arc<SessionTokens>,
}

impl_has_auth_backend!(ApiState);

/// Create the API router.
pub fn create_api_router(
    service: Arc<AuthService>,
    rate_limit_config: Arc<RateLimitConfig>,
) -> Router {
    let state = ApiState {
        sessions: service.sessions().clone(),
        service,
    };

    Router::new()
        .nest("/auth", auth::router(state.clone(), rate_limit_config))
        .nest("/admin", admin::router(state.clone()))
        .merge(me::router(state))
}
