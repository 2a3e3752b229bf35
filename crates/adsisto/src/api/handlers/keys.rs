//! Key registry management handlers.
//!
//! All routes here sit behind the session middleware and an access gate.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth::CurrentUser;
use crate::registry::{RegistryError, with_timeout};

/// One registered key, as listed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEntry {
    pub public_key: String,
    pub access_level: u32,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub keys: BTreeMap<String, KeyEntry>,
}

/// Body of `POST /api/keys`. Access level defaults to 0.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertKeyRequest {
    pub identity: String,
    pub public_key: String,
    #[serde(default)]
    pub access_level: u32,
}

/// Body of `PUT /api/keys`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKeyRequest {
    pub identity: String,
    pub public_key: String,
    pub access_level: u32,
}

/// Body of `DELETE /api/keys`.
#[derive(Debug, Deserialize)]
pub struct DeleteKeyRequest {
    pub identity: String,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

async fn audit_change(
    state: &AppState,
    user: &CurrentUser,
    action: &str,
    target: &str,
    result: &Result<(), RegistryError>,
) {
    if let Some(logger) = state.audit_logger.as_ref() {
        let outcome = match result {
            Ok(()) => "success",
            Err(RegistryError::InvalidInput(_)) => "rejected",
            Err(RegistryError::NotImplemented) => "not_implemented",
            Err(_) => "error",
        };
        logger
            .log_key_change(user.id(), action, target, outcome)
            .await;
    }
}

/// List all registered identities.
#[instrument(skip(state))]
pub async fn list_keys(State(state): State<AppState>) -> ApiResult<Json<KeysResponse>> {
    let registry = state.auth.registry();
    let records = with_timeout(state.auth.registry_timeout(), registry.get_all()).await?;

    let keys = records
        .into_iter()
        .map(|(identity, record)| {
            (
                identity,
                KeyEntry {
                    public_key: record.public_key,
                    access_level: record.access_level,
                },
            )
        })
        .collect();
    Ok(Json(KeysResponse { keys }))
}

/// Register a new identity.
#[instrument(skip(state, user, payload))]
pub async fn insert_key(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<InsertKeyRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let request = body(payload)?;
    let registry = state.auth.registry();

    let result = with_timeout(
        state.auth.registry_timeout(),
        registry.insert(&request.identity, &request.public_key, request.access_level),
    )
    .await;
    audit_change(&state, &user, "key_insert", &request.identity, &result).await;
    result?;

    info!(
        actor = %user.id(),
        identity = %request.identity,
        access_level = request.access_level,
        "key registered"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the key and access level of an identity.
#[instrument(skip(state, user, payload))]
pub async fn update_key(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<UpdateKeyRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let request = body(payload)?;
    let registry = state.auth.registry();

    let result = with_timeout(
        state.auth.registry_timeout(),
        registry.update(&request.identity, &request.public_key, request.access_level),
    )
    .await;
    audit_change(&state, &user, "key_update", &request.identity, &result).await;
    result?;

    info!(
        actor = %user.id(),
        identity = %request.identity,
        access_level = request.access_level,
        "key updated"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Remove an identity.
#[instrument(skip(state, user, payload))]
pub async fn delete_key(
    State(state): State<AppState>,
    user: CurrentUser,
    payload: Result<Json<DeleteKeyRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let request = body(payload)?;
    let registry = state.auth.registry();

    let result = with_timeout(state.auth.registry_timeout(), registry.delete(&request.identity))
        .await;
    audit_change(&state, &user, "key_delete", &request.identity, &result).await;
    result?;

    info!(actor = %user.id(), identity = %request.identity, "key removed");
    Ok(StatusCode::NO_CONTENT)
}
