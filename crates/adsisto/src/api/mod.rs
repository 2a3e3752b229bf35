//! HTTP API module.
//!
//! Login endpoint, key management and the protected route wiring.

mod audit;
mod error;
pub mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::{DEFAULT_MAX_BODY_KB, create_router, create_router_with_config};
pub use state::AppState;
