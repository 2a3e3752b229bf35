//! Login assertion validation.
//!
//! A client logs in by sending a short-lived JWT it signed with its own
//! private key, with its identity in `iss`. The verifying key is looked up
//! in the registry by that identity.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::claims::UnverifiedToken;
use super::keys::VerifyingKey;
use super::{AuthError, SigningAlgorithm};
use crate::registry::{KeyRecord, KeyRegistry, RegistryError, with_timeout};

/// Why an assertion was rejected. Only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingIssuer,
    UnknownIdentity,
    SignatureRejected,
    ClaimsRejected,
}

impl RejectReason {
    fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingIssuer => "missing issuer",
            RejectReason::UnknownIdentity => "unknown identity",
            RejectReason::SignatureRejected => "signature rejected",
            RejectReason::ClaimsRejected => "claims rejected",
        }
    }
}

/// Assertion validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthnError {
    #[error("invalid assertion: {0}")]
    InvalidToken(String),

    /// The reason is logged, never returned to the client.
    #[error("unauthenticated")]
    Unauthenticated(RejectReason),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<AuthnError> for AuthError {
    fn from(err: AuthnError) -> Self {
        match err {
            AuthnError::InvalidToken(reason) => AuthError::MalformedToken(reason),
            AuthnError::Unauthenticated(_) => AuthError::Unauthenticated,
            AuthnError::Registry(e) => AuthError::Internal(e.to_string()),
        }
    }
}

/// Verifies login assertions against the key registry.
pub struct AuthnValidator {
    registry: Arc<dyn KeyRegistry>,
    algorithm: SigningAlgorithm,
    authn_timeout: i64,
    leeway: i64,
    registry_timeout: Duration,
}

impl AuthnValidator {
    pub fn new(
        registry: Arc<dyn KeyRegistry>,
        algorithm: SigningAlgorithm,
        authn_timeout: i64,
        leeway: i64,
        registry_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            algorithm,
            authn_timeout,
            leeway,
            registry_timeout,
        }
    }

    /// Validate an assertion against the current time.
    pub async fn validate(&self, token: &str) -> Result<KeyRecord, AuthnError> {
        self.validate_at(token, chrono::Utc::now().timestamp()).await
    }

    /// Validate an assertion as of `now` (unix seconds).
    ///
    /// Returns the registry record of the authenticated identity.
    pub async fn validate_at(&self, token: &str, now: i64) -> Result<KeyRecord, AuthnError> {
        let parsed = UnverifiedToken::parse(token).map_err(AuthnError::InvalidToken)?;

        let Some(issuer) = parsed.str_claim("iss").filter(|iss| !iss.is_empty()) else {
            return Err(self.reject(None, RejectReason::MissingIssuer));
        };

        let record = match with_timeout(self.registry_timeout, self.registry.get(issuer)).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(self.reject(Some(issuer), RejectReason::UnknownIdentity)),
            Err(e) => {
                warn!(
                    identity = %issuer,
                    backend = self.registry.name(),
                    error = %e,
                    "key registry lookup failed"
                );
                return Err(AuthnError::Registry(e));
            }
        };

        self.verify_signature(token, &parsed, &record)?;
        self.check_claims(&parsed, now)
            .map_err(|reason| self.reject(Some(issuer), reason))?;

        debug!(identity = %record.identity, "login assertion accepted");
        Ok(record)
    }

    fn verify_signature(
        &self,
        token: &str,
        parsed: &UnverifiedToken,
        record: &KeyRecord,
    ) -> Result<(), AuthnError> {
        if parsed.alg != self.algorithm.as_str() {
            return Err(self.reject(Some(&record.identity), RejectReason::SignatureRejected));
        }

        let key = VerifyingKey::from_pem(self.algorithm, record.public_key.as_bytes()).map_err(
            |e| {
                warn!(
                    identity = %record.identity,
                    error = %e,
                    "registered public key does not parse"
                );
                self.reject(Some(&record.identity), RejectReason::SignatureRejected)
            },
        )?;

        if key.verify(token) {
            Ok(())
        } else {
            Err(self.reject(Some(&record.identity), RejectReason::SignatureRejected))
        }
    }

    /// `iat` and `exp` must be present, the token must be inside its window
    /// and its lifetime must not exceed the configured maximum.
    fn check_claims(&self, parsed: &UnverifiedToken, now: i64) -> Result<(), RejectReason> {
        let (Some(iat), Some(exp)) = (parsed.int_claim("iat"), parsed.int_claim("exp")) else {
            return Err(RejectReason::ClaimsRejected);
        };
        let leeway = self.leeway;

        if exp < now.saturating_sub(leeway) {
            return Err(RejectReason::ClaimsRejected);
        }
        if iat > now.saturating_add(leeway) {
            return Err(RejectReason::ClaimsRejected);
        }
        if parsed.has_claim("nbf") {
            match parsed.int_claim("nbf") {
                Some(nbf) if nbf <= now.saturating_add(leeway) => {}
                _ => return Err(RejectReason::ClaimsRejected),
            }
        }
        if exp < iat || exp.saturating_sub(iat) > self.authn_timeout {
            return Err(RejectReason::ClaimsRejected);
        }
        Ok(())
    }

    fn reject(&self, identity: Option<&str>, reason: RejectReason) -> AuthnError {
        info!(
            identity = identity.unwrap_or("-"),
            reason = reason.as_str(),
            "login assertion rejected"
        );
        AuthnError::Unauthenticated(reason)
    }
}
