//! Login, logout and identity handlers.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::api::state::AppState;
use crate::auth::{AuthError, AuthnError, CurrentUser};

/// Login request: a self-signed assertion.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

/// Login response: the session token.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Exchange a login assertion for a session token.
///
/// The token is returned in the body and set as the session cookie.
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Json(request) = payload.map_err(|e| AuthError::InvalidRequest(e.body_text()))?;

    let record = match state.auth.authenticate(&request.token).await {
        Ok(record) => record,
        Err(e) => {
            let outcome = match &e {
                AuthnError::InvalidToken(_) => "malformed",
                AuthnError::Unauthenticated(_) => "rejected",
                AuthnError::Registry(_) => "error",
            };
            if let Some(logger) = state.audit_logger.as_ref() {
                logger.log_login(None, outcome, None).await;
            }
            return Err(e.into());
        }
    };

    let session = state.auth.issue_session(&record).map_err(|e| {
        warn!(identity = %record.identity, error = %e, "failed to issue session token");
        e
    })?;

    if let Some(logger) = state.audit_logger.as_ref() {
        logger
            .log_login(
                Some(&record.identity),
                "success",
                session.claims.jti.as_deref(),
            )
            .await;
    }
    info!(identity = %record.identity, "login succeeded");

    let cookie = state.auth.session_cookie(&session.token);
    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Json(LoginResponse {
            token: session.token,
        }),
    ))
}

/// Clear the session cookie.
///
/// Session tokens are stateless, so a copied token stays valid until it expires.
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        AppendHeaders([(SET_COOKIE, state.auth.clear_session_cookie())]),
        StatusCode::NO_CONTENT,
    )
}

/// Identity of the current session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub identity: String,
    pub access_level: Option<u32>,
}

/// Echo the session's identity and access level.
pub async fn get_me(user: CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        identity: user.id().to_string(),
        access_level: user.access_level(),
    })
}
