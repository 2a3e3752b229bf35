//! Authentication configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ServerKeyPair, SigningAlgorithm};

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Signing algorithm for both assertions and session tokens.
    pub algorithm: String,

    /// Path to the server's public key (PEM).
    pub public_key_path: Option<String>,

    /// Inline public key PEM, or `env:VAR_NAME`. Takes precedence over the path.
    pub public_key: Option<String>,

    /// Path to the server's private key (PEM, PKCS#8 for EC keys).
    pub private_key_path: Option<String>,

    /// Inline private key PEM, or `env:VAR_NAME`. Takes precedence over the path.
    pub private_key: Option<String>,

    /// Maximum lifetime of a login assertion (`exp - iat`), in seconds.
    pub authn_timeout_secs: u64,

    /// Lifetime of issued session tokens, in seconds.
    pub session_timeout_secs: u64,

    /// Clock skew tolerated on every time check, in seconds.
    pub leeway_secs: u64,

    /// Cookie carrying the session token.
    pub cookie_name: String,

    /// Mark the session cookie `Secure`.
    pub cookie_secure: bool,

    /// Where browsers without a session are redirected.
    pub login_path: String,

    /// Access level required for key management endpoints.
    pub admin_access_level: u32,

    /// Upper bound for a single registry call, in milliseconds.
    pub registry_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            public_key_path: None,
            public_key: None,
            private_key_path: None,
            private_key: None,
            authn_timeout_secs: 300,
            session_timeout_secs: 3600,
            leeway_secs: 5,
            cookie_name: "auth_token".to_string(),
            cookie_secure: true,
            login_path: "/auth/login".to_string(),
            admin_access_level: 10,
            registry_timeout_ms: 2000,
        }
    }
}

impl AuthConfig {
    /// Parse the configured algorithm and check the timing settings.
    pub fn validate(&self) -> Result<SigningAlgorithm, ConfigError> {
        let algorithm: SigningAlgorithm = self.algorithm.parse()?;

        if self.authn_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("authn_timeout_secs"));
        }
        if self.session_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("session_timeout_secs"));
        }
        if self.registry_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("registry_timeout_ms"));
        }
        if self.cookie_name.trim().is_empty() {
            return Err(ConfigError::InvalidCookieName);
        }
        Ok(algorithm)
    }

    /// Resolve and parse the server key pair.
    pub fn load_key_pair(&self, algorithm: SigningAlgorithm) -> Result<ServerKeyPair, ConfigError> {
        let public = resolve_key_material(
            self.public_key.as_deref(),
            self.public_key_path.as_deref(),
        )
        .map_err(|e| match e {
            ConfigError::KeyFileUnreadable(reason) => ConfigError::MissingPublicKey(reason),
            other => other,
        })?
        .ok_or_else(|| ConfigError::MissingPublicKey("not configured".to_string()))?;

        let private = resolve_key_material(
            self.private_key.as_deref(),
            self.private_key_path.as_deref(),
        )
        .map_err(|e| match e {
            ConfigError::KeyFileUnreadable(reason) => ConfigError::MissingPrivateKey(reason),
            other => other,
        })?
        .ok_or_else(|| ConfigError::MissingPrivateKey("not configured".to_string()))?;

        ServerKeyPair::from_pem(algorithm, public.as_bytes(), private.as_bytes())
    }

    pub fn authn_timeout(&self) -> i64 {
        saturating_secs(self.authn_timeout_secs)
    }

    pub fn session_timeout(&self) -> i64 {
        saturating_secs(self.session_timeout_secs)
    }

    pub fn leeway(&self) -> i64 {
        saturating_secs(self.leeway_secs)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }
}

fn saturating_secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Resolve an inline value with `env:VAR_NAME` expansion.
pub fn resolve_env_value(value: &str) -> Result<String, ConfigError> {
    match value.strip_prefix("env:") {
        Some(var_name) => match std::env::var(var_name) {
            Ok(resolved) if !resolved.trim().is_empty() => Ok(resolved),
            Ok(_) => Err(ConfigError::EnvVarEmpty(var_name.to_string())),
            Err(_) => Err(ConfigError::EnvVarNotFound(var_name.to_string())),
        },
        None => Ok(value.to_string()),
    }
}

/// Inline material wins over a path. `Ok(None)` when neither is set.
fn resolve_key_material(
    inline: Option<&str>,
    path: Option<&str>,
) -> Result<Option<String>, ConfigError> {
    if let Some(value) = inline.filter(|v| !v.trim().is_empty()) {
        return resolve_env_value(value).map(Some);
    }
    match path.filter(|p| !p.trim().is_empty()) {
        Some(path) => {
            let expanded = shellexpand::tilde(path);
            std::fs::read_to_string(expanded.as_ref())
                .map(Some)
                .map_err(|e| ConfigError::KeyFileUnreadable(format!("{path}: {e}")))
        }
        None => Ok(None),
    }
}

/// Startup configuration errors. Any of these stops the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("symmetric algorithm {0} is not allowed, use RS* or ES*")]
    SymmetricAlgorithm(String),

    #[error("invalid signing algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("public key is required: {0}")]
    MissingPublicKey(String),

    #[error("private key is required: {0}")]
    MissingPrivateKey(String),

    #[error("failed to read key file {0}")]
    KeyFileUnreadable(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("public and private key do not form a pair")]
    KeyPairMismatch,

    #[error("environment variable '{0}' not found (referenced via env:{0} in config)")]
    EnvVarNotFound(String),

    #[error("environment variable '{0}' is empty (referenced via env:{0} in config)")]
    EnvVarEmpty(String),

    #[error("{0} must be greater than zero")]
    InvalidTimeout(&'static str),

    #[error("cookie_name must not be empty")]
    InvalidCookieName,

    #[error("unknown registry backend: {0}")]
    UnknownRegistryBackend(String),

    #[error("failed to initialize key registry: {0}")]
    Registry(String),
}
