//! Session token issuing and validation.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::claims::{SessionClaims, SessionUser, UnverifiedToken};
use super::keys::ServerKeyPair;
use super::AuthError;
use crate::registry::KeyRecord;

/// A freshly signed session token.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: SessionClaims,
}

/// Signs session tokens with the server key.
pub struct SessionIssuer {
    keys: Arc<ServerKeyPair>,
    session_timeout: i64,
}

impl SessionIssuer {
    pub fn new(keys: Arc<ServerKeyPair>, session_timeout: i64) -> Self {
        Self {
            keys,
            session_timeout,
        }
    }

    pub fn session_timeout(&self) -> i64 {
        self.session_timeout
    }

    /// Issue a session token for an authenticated identity.
    pub fn issue(&self, record: &KeyRecord) -> Result<IssuedSession, AuthError> {
        self.issue_at(record, chrono::Utc::now().timestamp())
    }

    /// Issue a session token as of `now` (unix seconds).
    pub fn issue_at(&self, record: &KeyRecord, now: i64) -> Result<IssuedSession, AuthError> {
        let claims = self.claims_for(record, now);
        let token = self
            .keys
            .sign(&claims)
            .map_err(|e| AuthError::Internal(format!("failed to sign session token: {e}")))?;
        Ok(IssuedSession { token, claims })
    }

    pub fn claims_for(&self, record: &KeyRecord, now: i64) -> SessionClaims {
        SessionClaims {
            sub: record.identity.clone(),
            iat: now,
            nbf: Some(now),
            exp: now.saturating_add(self.session_timeout),
            jti: Some(uuid::Uuid::new_v4().to_string()),
            user: Some(SessionUser {
                identity: record.identity.clone(),
                access_level: Some(record.access_level),
            }),
        }
    }
}

/// Session token rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("missing claim: {0}")]
    MissingClaim(&'static str),

    #[error("signature rejected")]
    InvalidSignature,

    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Malformed(reason) => AuthError::MalformedToken(reason),
            _ => AuthError::Forbidden,
        }
    }
}

/// Verifies session tokens issued by [`SessionIssuer`].
pub struct SessionValidator {
    keys: Arc<ServerKeyPair>,
    leeway: i64,
}

impl SessionValidator {
    pub fn new(keys: Arc<ServerKeyPair>, leeway: i64) -> Self {
        Self { keys, leeway }
    }

    pub fn validate(&self, token: &str) -> Result<SessionClaims, SessionError> {
        self.validate_at(token, chrono::Utc::now().timestamp())
    }

    /// Validate a session token as of `now` (unix seconds).
    pub fn validate_at(&self, token: &str, now: i64) -> Result<SessionClaims, SessionError> {
        let parsed = UnverifiedToken::parse(token).map_err(SessionError::Malformed)?;

        for claim in ["iat", "exp", "sub"] {
            if !parsed.has_claim(claim) {
                return Err(SessionError::MissingClaim(claim));
            }
        }

        if parsed.alg != self.keys.algorithm().as_str() || !self.keys.verify(token) {
            return Err(SessionError::InvalidSignature);
        }

        let claims: SessionClaims = serde_json::from_value(Value::Object(parsed.claims))
            .map_err(|e| SessionError::InvalidClaims(e.to_string()))?;

        if let Some(nbf) = claims.nbf
            && nbf > now.saturating_add(self.leeway)
        {
            return Err(SessionError::NotYetValid);
        }
        if now > claims.exp.saturating_add(self.leeway) {
            return Err(SessionError::Expired);
        }

        Ok(claims)
    }
}
