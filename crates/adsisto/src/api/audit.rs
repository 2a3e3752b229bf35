//! Audit middleware for HTTP requests.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

use crate::auth::CurrentUser;

use super::state::AppState;

/// Record every authenticated request. Must run after the session middleware.
pub async fn audit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let user = req.extensions().get::<CurrentUser>().map(|user| {
        (
            user.id().to_string(),
            user.session_id().map(|s| s.to_string()),
        )
    });

    let response = next.run(req).await;

    if let (Some(logger), Some((identity, session_id))) = (state.audit_logger.as_ref(), user) {
        logger
            .log_http(
                &identity,
                session_id.as_deref(),
                &method,
                &path,
                response.status().as_u16(),
                start.elapsed().as_millis(),
            )
            .await;
    }

    response
}
