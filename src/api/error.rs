//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::AuthError;

/// Message for every rejected action token, whatever the reason.
pub const INVALID_ACTION_TOKEN: &str = "Invalid or expired token";

/// Message for every rejected refresh token, expiry included.
pub const INVALID_REFRESH_TOKEN: &str = "Invalid refresh token";

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    /// Convert an [`AuthError`], logging it under `context` at a level that
    /// matches its severity.
    fn api_err(self, context: &str) -> Result<T, ApiError>;
}

impl<T> ResultExt<T> for Result<T, AuthError> {
    fn api_err(self, context: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::from_auth(context, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Unauthorized(String),
    Conflict(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn from_auth(context: &str, e: AuthError) -> Self {
        match e {
            AuthError::InvalidInput(msg) => Self::BadRequest(msg),
            AuthError::CredentialInvalid => Self::Unauthorized(e.to_string()),
            AuthError::EmailTaken => Self::Conflict(e.to_string()),
            AuthError::AccountUnverified => Self::Forbidden(e.to_string()),
            AuthError::InsufficientRole => Self::Forbidden(e.to_string()),
            AuthError::TokenExpired
            | AuthError::PurposeMismatch
            | AuthError::TokenAlreadyUsed
            | AuthError::TokenNotFound => {
                debug!(kind = e.kind(), "{}", context);
                Self::BadRequest(INVALID_ACTION_TOKEN.into())
            }
            AuthError::TokenMalformed
            | AuthError::SignatureInvalid
            | AuthError::InvalidRefreshToken => {
                debug!(kind = e.kind(), "{}", context);
                Self::Unauthorized(INVALID_REFRESH_TOKEN.into())
            }
            AuthError::MailDelivery(_) => {
                warn!(kind = e.kind(), error = %e, "{}", context);
                Self::ServiceUnavailable("Could not send email. Please try again later".into())
            }
            AuthError::Transient(_) => {
                warn!(kind = e.kind(), error = %e, "{}", context);
                Self::ServiceUnavailable("Temporarily unavailable. Please try again".into())
            }
            AuthError::Hard(_) | AuthError::Hashing(_) => {
                error!(kind = e.kind(), error = %e, "{}", context);
                Self::Internal("Internal error".into())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::StoreError;

    fn status(e: AuthError) -> StatusCode {
        ApiError::from_auth("test", e).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status(AuthError::CredentialInvalid), StatusCode::UNAUTHORIZED);
        assert_eq!(status(AuthError::EmailTaken), StatusCode::CONFLICT);
        assert_eq!(status(AuthError::AccountUnverified), StatusCode::FORBIDDEN);
        assert_eq!(status(AuthError::TokenAlreadyUsed), StatusCode::BAD_REQUEST);
        assert_eq!(status(AuthError::InvalidRefreshToken), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(StoreError::Transient("busy".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(StoreError::Hard("corrupt".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_action_token_failures_share_one_message() {
        for e in [
            AuthError::TokenExpired,
            AuthError::PurposeMismatch,
            AuthError::TokenAlreadyUsed,
            AuthError::TokenNotFound,
        ] {
            match ApiError::from_auth("test", e) {
                ApiError::BadRequest(msg) => assert_eq!(msg, INVALID_ACTION_TOKEN),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_refresh_failures_have_their_own_message() {
        for e in [
            AuthError::InvalidRefreshToken,
            AuthError::TokenMalformed,
            AuthError::SignatureInvalid,
        ] {
            match ApiError::from_auth("test", e) {
                ApiError::Unauthorized(msg) => assert_eq!(msg, INVALID_REFRESH_TOKEN),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
