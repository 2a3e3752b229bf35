//! Identity key registry.
//!
//! Maps an identity (usually an email address) to the public key the client
//! signs its login assertions with, plus the access level granted to it.
//! Backends are selected by name at startup through [`RegistryFactories`].

mod memory;
mod sqlite;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{ConfigError, KeyFamily, normalize_public_key};

pub use memory::{MemoryKeyEntry, MemoryKeyRegistry, MemoryRegistryConfig};
pub use sqlite::{SqliteKeyRegistry, SqliteQueries, SqliteRegistryConfig};

/// Longest identity accepted by registry mutations.
pub const MAX_IDENTITY_LEN: usize = 254;

/// A registered identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub identity: String,
    /// PEM encoded public key.
    pub public_key: String,
    pub access_level: u32,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Rejected input (bad identity, bad key, duplicate or unknown identity).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The backend does not support this operation.
    #[error("method not implemented")]
    NotImplemented,

    /// The backend failed or is unreachable.
    #[error("registry backend error: {0}")]
    Backend(String),

    /// The backend did not answer in time.
    #[error("registry backend timed out")]
    Timeout,
}

impl RegistryError {
    /// Whether this error means the backend itself is unhealthy.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, RegistryError::Backend(_) | RegistryError::Timeout)
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::Backend(err.to_string())
    }
}

/// Storage for identity keys.
///
/// `get` returns `Ok(None)` for an unknown identity; `Err` is reserved for
/// backend trouble so callers can fail closed instead of treating an outage
/// as "not registered". Read-only backends answer mutations with
/// [`RegistryError::NotImplemented`].
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    async fn get(&self, identity: &str) -> Result<Option<KeyRecord>, RegistryError>;

    async fn get_all(&self) -> Result<BTreeMap<String, KeyRecord>, RegistryError>;

    async fn insert(
        &self,
        identity: &str,
        public_key: &str,
        access_level: u32,
    ) -> Result<(), RegistryError>;

    async fn update(
        &self,
        identity: &str,
        public_key: &str,
        access_level: u32,
    ) -> Result<(), RegistryError>;

    async fn delete(&self, identity: &str) -> Result<(), RegistryError>;
}

/// Run a registry call with an upper bound on how long it may take.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, RegistryError>
where
    F: Future<Output = Result<T, RegistryError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RegistryError::Timeout),
    }
}

/// Check an identity before it is written to a registry.
pub fn validate_identity(identity: &str) -> Result<(), RegistryError> {
    if identity.is_empty() {
        return Err(RegistryError::InvalidInput("identity is required".to_string()));
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(RegistryError::InvalidInput(format!(
            "identity exceeds {MAX_IDENTITY_LEN} bytes"
        )));
    }
    if identity
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(RegistryError::InvalidInput(
            "identity must not contain whitespace or control characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a mutation's identity and key, returning the key as PEM.
pub fn validate_entry(
    family: KeyFamily,
    identity: &str,
    public_key: &str,
) -> Result<String, RegistryError> {
    validate_identity(identity)?;
    normalize_public_key(family, public_key).map_err(RegistryError::InvalidInput)
}

/// Registry selection and per-backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend name, looked up in [`RegistryFactories`].
    pub backend: String,
    pub memory: MemoryRegistryConfig,
    pub sqlite: SqliteRegistryConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            memory: MemoryRegistryConfig::default(),
            sqlite: SqliteRegistryConfig::default(),
        }
    }
}

/// Constructor for one registry backend.
pub type RegistryConstructor =
    fn(&RegistryConfig, KeyFamily) -> Result<Arc<dyn KeyRegistry>, RegistryError>;

/// Name to constructor map for registry backends.
#[derive(Clone)]
pub struct RegistryFactories {
    constructors: HashMap<&'static str, RegistryConstructor>,
}

impl Default for RegistryFactories {
    fn default() -> Self {
        let mut factories = Self::empty();
        factories.register("memory", memory::build);
        factories.register("sqlite", sqlite::build);
        factories
    }
}

impl RegistryFactories {
    /// A map with no backends registered.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register (or replace) a backend constructor.
    pub fn register(&mut self, name: &'static str, constructor: RegistryConstructor) {
        self.constructors.insert(name, constructor);
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Build the backend selected by `config.backend`.
    pub fn build(
        &self,
        config: &RegistryConfig,
        family: KeyFamily,
    ) -> Result<Arc<dyn KeyRegistry>, ConfigError> {
        let name = config.backend.trim().to_ascii_lowercase();
        let constructor = self
            .constructors
            .get(name.as_str())
            .ok_or_else(|| ConfigError::UnknownRegistryBackend(config.backend.clone()))?;

        constructor(config, family).map_err(|e| ConfigError::Registry(e.to_string()))
    }
}
