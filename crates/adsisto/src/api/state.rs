//! Application state shared across handlers.

use crate::audit::AuditLogger;
use crate::auth::AuthState;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Authentication core: validators, issuer and the key registry.
    pub auth: AuthState,
    /// Audit log, when configured.
    pub audit_logger: Option<AuditLogger>,
}

impl AppState {
    pub fn new(auth: AuthState) -> Self {
        Self {
            auth,
            audit_logger: None,
        }
    }

    pub fn with_audit_logger(mut self, logger: AuditLogger) -> Self {
        self.audit_logger = Some(logger);
        self
    }
}
