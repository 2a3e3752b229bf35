//! Authentication errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Errors returned by the login endpoint and the session middleware.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No session token in header or cookie.
    #[error("missing session token")]
    MissingToken,

    /// No session token and the client is a browser.
    #[error("login required")]
    LoginRequired(String),

    /// `Authorization` header present but not `Bearer <token>`.
    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    /// Token is not a structurally valid JWT.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Request body could not be read.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Login assertion rejected.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Session token rejected.
    #[error("invalid session token")]
    Forbidden,

    /// Session is valid but its access level is too low.
    #[error("insufficient access level, {required} required")]
    InsufficientAccess { required: u32 },

    /// Session carries no access level.
    #[error("session token carries no access level")]
    MalformedSession,

    /// Internal error. Details go to the log only.
    #[error("internal auth error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            AuthError::LoginRequired(path) => return Redirect::temporary(path).into_response(),
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing_token"),
            AuthError::InvalidAuthHeader => (StatusCode::BAD_REQUEST, "invalid_auth_header"),
            AuthError::MalformedToken(_) => (StatusCode::BAD_REQUEST, "malformed_token"),
            AuthError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AuthError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            AuthError::InsufficientAccess { .. } => {
                (StatusCode::FORBIDDEN, "insufficient_access")
            }
            AuthError::MalformedSession => {
                (StatusCode::INTERNAL_SERVER_ERROR, "malformed_session")
            }
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let error = match &self {
            AuthError::MalformedToken(detail) => {
                debug!(detail = %detail, "malformed token");
                "malformed token".to_string()
            }
            AuthError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let body = Json(AuthErrorResponse {
            error,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}
