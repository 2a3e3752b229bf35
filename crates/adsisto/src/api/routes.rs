//! API route definitions.

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, header};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::{AccessGate, access_gate_middleware, auth_middleware};

use super::audit;
use super::handlers;
use super::state::AppState;

/// Default request body limit (key uploads are small).
pub const DEFAULT_MAX_BODY_KB: usize = 64;

/// Create the application router with the default body limit.
pub fn create_router(state: AppState) -> Router {
    create_router_with_config(state, DEFAULT_MAX_BODY_KB)
}

/// Create the application router.
///
/// - public: `/health`, `/auth/login`, `/auth/logout`
/// - any valid session: `/api/me`
/// - sessions at or above the admin access level: `/api/keys`
pub fn create_router_with_config(state: AppState, max_body_kb: usize) -> Router {
    let max_body_size = max_body_kb.max(1) * 1024;

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let auth_state = state.auth.clone();
    let admin_gate = AccessGate::new(state.auth.admin_access_level());

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .with_state(state.clone());

    let key_routes = Router::new()
        .route(
            "/api/keys",
            get(handlers::list_keys)
                .post(handlers::insert_key)
                .put(handlers::update_key)
                .delete(handlers::delete_key),
        )
        .route_layer(middleware::from_fn_with_state(
            admin_gate,
            access_gate_middleware,
        ));

    let protected_routes = Router::new()
        .route("/api/me", get(handlers::get_me))
        .merge(key_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            audit::audit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state);

    let frame_policy = HeaderValue::from_static("DENY");

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            frame_policy,
        ))
        .layer(trace_layer)
}
