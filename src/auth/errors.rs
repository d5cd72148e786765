//! Authorization gate errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Why the gate turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    /// No `Authorization` header
    MissingCredential,
    /// Header present but not `Bearer <token>`
    MalformedCredential,
    /// Token failed verification. Which check failed is only logged.
    InvalidCredential,
    /// Valid token, role below the route minimum
    InsufficientRole,
}

impl GateError {
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::MissingCredential => "missing_credential",
            GateError::MalformedCredential => "malformed_credential",
            GateError::InvalidCredential => "invalid_credential",
            GateError::InsufficientRole => "insufficient_role",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            GateError::MissingCredential
            | GateError::MalformedCredential
            | GateError::InvalidCredential => StatusCode::UNAUTHORIZED,
            GateError::InsufficientRole => StatusCode::FORBIDDEN,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            GateError::MissingCredential => "Not authenticated",
            GateError::MalformedCredential => "Malformed authorization header",
            GateError::InvalidCredential => "Invalid or expired token",
            GateError::InsufficientRole => "Insufficient permissions",
        }
    }
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for GateError {}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        let mut response = (
            self.status_code(),
            Json(ErrorResponse {
                error: self.message(),
            }),
        )
            .into_response();

        if self.status_code() == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }

        response
    }
}
