//! Authentication and access control.
//!
//! Login is a two-step exchange:
//! - the client posts an assertion signed with its registered key
//!   ([`AuthnValidator`])
//! - the server answers with a session token signed with the server key
//!   ([`SessionIssuer`])
//!
//! Protected routes run [`auth_middleware`] (session check) and optionally
//! [`access_gate_middleware`] (minimum access level).

mod algorithm;
mod authn;
mod claims;
mod config;
mod error;
mod keys;
mod middleware;
mod session;

pub use algorithm::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, KeyFamily, SigningAlgorithm};
pub use authn::{AuthnError, AuthnValidator, RejectReason};
pub use claims::{SessionClaims, SessionUser};
pub use self::config::{AuthConfig, ConfigError, resolve_env_value};
pub use error::{AuthError, AuthErrorResponse};
pub use keys::{ServerKeyPair, VerifyingKey, decoding_key_for, normalize_public_key};
pub use middleware::{
    AccessGate, AuthState, CurrentUser, access_gate_middleware, auth_middleware,
};
pub use session::{IssuedSession, SessionError, SessionIssuer, SessionValidator};
