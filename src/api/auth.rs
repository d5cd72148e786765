//! Registration, login, token refresh, email verification and password reset.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ApiState;
use super::error::{ApiError, INVALID_ACTION_TOKEN, ResultExt};
use crate::auth::{AnyRole, Auth};
use crate::rate_limit::{
    RateLimitConfig, rate_limit_forgot_password, rate_limit_login, rate_limit_register,
};

pub fn router(state: ApiState, rate_limit_config: Arc<RateLimitConfig>) -> Router {
    let register_router = Router::new()
        .route("/register", post(register))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit_config.clone(),
            rate_limit_register,
        ));

    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit_config.clone(),
            rate_limit_login,
        ));

    let forgot_router = Router::new()
        .route("/forgot-password", post(forgot_password))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit_config,
            rate_limit_forgot_password,
        ));

    let open_router = Router::new()
        .route("/refresh", post(refresh))
        .route("/verify", get(verify_email))
        .route("/verify/resend", post(resend_verification))
        .route("/reset-password", post(reset_password))
        .with_state(state);

    Router::new()
        .merge(register_router)
        .merge(login_router)
        .merge(forgot_router)
        .merge(open_router)
}

#[derive(Deserialize)]
struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
struct ForgotPasswordRequest {
    email: String,
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    token: String,
    new_password: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

async fn register(
    State(state): State<ApiState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pair = state
        .service
        .register(&payload.email, &payload.password)
        .await
        .api_err("Registration failed")?;

    Ok((StatusCode::CREATED, Json(pair)))
}

async fn login(
    State(state): State<ApiState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pair = state
        .service
        .login(&payload.email, &payload.password)
        .await
        .api_err("Login failed")?;

    Ok(Json(pair))
}

async fn refresh(
    State(state): State<ApiState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let access_token = state
        .service
        .refresh(&payload.refresh_token)
        .api_err("Refresh failed")?;

    Ok(Json(RefreshResponse { access_token }))
}

async fn verify_email(
    State(state): State<ApiState>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request(INVALID_ACTION_TOKEN))?;

    state
        .service
        .verify_email(&token)
        .await
        .api_err("Email verification failed")?;

    Ok(Json(MessageResponse {
        message: "Email verified",
    }))
}

async fn resend_verification(
    State(state): State<ApiState>,
    auth: Auth<AnyRole>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .send_verification(&auth.identity_id)
        .await
        .api_err("Resending verification failed")?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Verification email sent",
        }),
    ))
}

async fn forgot_password(
    State(state): State<ApiState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .request_password_reset(&payload.email)
        .await
        .api_err("Password reset request failed")?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If that email is registered, a reset link is on its way",
        }),
    ))
}

async fn reset_password(
    State(state): State<ApiState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .reset_password(&payload.token, &payload.new_password)
        .await
        .api_err("Password reset failed")?;

    Ok(Json(MessageResponse {
        message: "Password updated",
    }))
}
