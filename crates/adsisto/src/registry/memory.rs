//! In-memory key registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{KeyRecord, KeyRegistry, RegistryConfig, RegistryError, validate_entry};
use crate::auth::KeyFamily;

/// Settings for the `memory` backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryRegistryConfig {
    /// Reject mutations with `NotImplemented`.
    pub read_only: bool,
    /// Identities seeded at startup.
    pub keys: BTreeMap<String, MemoryKeyEntry>,
}

/// One seeded identity. Exactly one of `public_key` / `public_key_path` is expected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryKeyEntry {
    pub public_key: Option<String>,
    pub public_key_path: Option<String>,
    pub access_level: u32,
}

impl MemoryKeyEntry {
    fn key_material(&self, identity: &str) -> Result<String, RegistryError> {
        if let Some(key) = self.public_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.to_string());
        }
        let path = self
            .public_key_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                RegistryError::InvalidInput(format!("no public key configured for {identity}"))
            })?;
        let expanded = shellexpand::tilde(path);
        std::fs::read_to_string(expanded.as_ref()).map_err(|e| {
            RegistryError::InvalidInput(format!("failed to read public key {path}: {e}"))
        })
    }
}

/// Registry held in process memory.
#[derive(Debug)]
pub struct MemoryKeyRegistry {
    family: KeyFamily,
    read_only: bool,
    keys: RwLock<BTreeMap<String, KeyRecord>>,
}

impl MemoryKeyRegistry {
    /// Empty, writable registry.
    pub fn new(family: KeyFamily) -> Self {
        Self {
            family,
            read_only: false,
            keys: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry pre-populated with `records`. Keys are validated for `family`.
    pub fn with_records(
        family: KeyFamily,
        records: impl IntoIterator<Item = KeyRecord>,
        read_only: bool,
    ) -> Result<Self, RegistryError> {
        let mut keys = BTreeMap::new();
        for record in records {
            let public_key = validate_entry(family, &record.identity, &record.public_key)?;
            keys.insert(
                record.identity.clone(),
                KeyRecord {
                    public_key,
                    ..record
                },
            );
        }
        Ok(Self {
            family,
            read_only,
            keys: RwLock::new(keys),
        })
    }

    /// Build from the `[registry.memory]` section.
    pub fn from_config(
        config: &MemoryRegistryConfig,
        family: KeyFamily,
    ) -> Result<Self, RegistryError> {
        let mut records = Vec::with_capacity(config.keys.len());
        for (identity, entry) in &config.keys {
            records.push(KeyRecord {
                identity: identity.clone(),
                public_key: entry.key_material(identity)?,
                access_level: entry.access_level,
            });
        }
        Self::with_records(family, records, config.read_only)
    }

    fn ensure_writable(&self) -> Result<(), RegistryError> {
        if self.read_only {
            return Err(RegistryError::NotImplemented);
        }
        Ok(())
    }
}

pub(super) fn build(
    config: &RegistryConfig,
    family: KeyFamily,
) -> Result<Arc<dyn KeyRegistry>, RegistryError> {
    Ok(Arc::new(MemoryKeyRegistry::from_config(
        &config.memory,
        family,
    )?))
}

#[async_trait]
impl KeyRegistry for MemoryKeyRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, identity: &str) -> Result<Option<KeyRecord>, RegistryError> {
        Ok(self.keys.read().await.get(identity).cloned())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, KeyRecord>, RegistryError> {
        Ok(self.keys.read().await.clone())
    }

    async fn insert(
        &self,
        identity: &str,
        public_key: &str,
        access_level: u32,
    ) -> Result<(), RegistryError> {
        self.ensure_writable()?;
        let public_key = validate_entry(self.family, identity, public_key)?;

        let mut keys = self.keys.write().await;
        if keys.contains_key(identity) {
            return Err(RegistryError::InvalidInput(format!(
                "identity already registered: {identity}"
            )));
        }
        keys.insert(
            identity.to_string(),
            KeyRecord {
                identity: identity.to_string(),
                public_key,
                access_level,
            },
        );
        Ok(())
    }

    async fn update(
        &self,
        identity: &str,
        public_key: &str,
        access_level: u32,
    ) -> Result<(), RegistryError> {
        self.ensure_writable()?;
        let public_key = validate_entry(self.family, identity, public_key)?;

        let mut keys = self.keys.write().await;
        let record = keys.get_mut(identity).ok_or_else(|| {
            RegistryError::InvalidInput(format!("identity is not registered: {identity}"))
        })?;
        record.public_key = public_key;
        record.access_level = access_level;
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<(), RegistryError> {
        self.ensure_writable()?;
        match self.keys.write().await.remove(identity) {
            Some(_) => Ok(()),
            None => Err(RegistryError::InvalidInput(format!(
                "identity is not registered: {identity}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE_PUB: &str = include_str!("../../tests/fixtures/alice_rsa_public.pem");
    const MALLORY_PUB: &str = include_str!("../../tests/fixtures/mallory_rsa_public.pem");
    const ALICE_EC_PUB: &str = include_str!("../../tests/fixtures/alice_ec_public.pem");

    #[tokio::test]
    async fn test_insert_get_update_delete() {
        let registry = MemoryKeyRegistry::new(KeyFamily::Rsa);

        assert_eq!(registry.get("alice@example.com").await.unwrap(), None);

        registry
            .insert("alice@example.com", ALICE_PUB, 3)
            .await
            .unwrap();
        let record = registry.get("alice@example.com").await.unwrap().unwrap();
        assert_eq!(record.identity, "alice@example.com");
        assert_eq!(record.access_level, 3);
        assert!(record.public_key.starts_with("-----BEGIN PUBLIC KEY-----"));

        registry
            .update("alice@example.com", MALLORY_PUB, 7)
            .await
            .unwrap();
        let record = registry.get("alice@example.com").await.unwrap().unwrap();
        assert_eq!(record.access_level, 7);
        assert_eq!(record.public_key.trim(), MALLORY_PUB.trim());

        registry.delete("alice@example.com").await.unwrap();
        assert_eq!(registry.get("alice@example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let registry = MemoryKeyRegistry::new(KeyFamily::Rsa);
        registry.insert("alice", ALICE_PUB, 0).await.unwrap();

        let err = registry.insert("alice", MALLORY_PUB, 1).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput(_)));

        // Original record untouched.
        let record = registry.get("alice").await.unwrap().unwrap();
        assert_eq!(record.access_level, 0);
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_identity() {
        let registry = MemoryKeyRegistry::new(KeyFamily::Rsa);
        assert!(matches!(
            registry.update("ghost", ALICE_PUB, 1).await,
            Err(RegistryError::InvalidInput(_))
        ));
        assert!(matches!(
            registry.delete("ghost").await,
            Err(RegistryError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_key_family_rejected() {
        let registry = MemoryKeyRegistry::new(KeyFamily::Rsa);
        let err = registry.insert("alice", ALICE_EC_PUB, 1).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput(_)));
        assert!(registry.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_rejects_mutations() {
        let seed = KeyRecord {
            identity: "alice".to_string(),
            public_key: ALICE_PUB.to_string(),
            access_level: 10,
        };
        let registry = MemoryKeyRegistry::with_records(KeyFamily::Rsa, [seed], true).unwrap();

        assert_eq!(
            registry.insert("bob", MALLORY_PUB, 1).await,
            Err(RegistryError::NotImplemented)
        );
        assert_eq!(
            registry.update("alice", MALLORY_PUB, 1).await,
            Err(RegistryError::NotImplemented)
        );
        assert_eq!(
            registry.delete("alice").await,
            Err(RegistryError::NotImplemented)
        );
        assert!(registry.get("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_from_config_reads_inline_and_file_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mallory.pem");
        std::fs::write(&path, MALLORY_PUB).unwrap();

        let mut config = MemoryRegistryConfig::default();
        config.keys.insert(
            "alice".to_string(),
            MemoryKeyEntry {
                public_key: Some(ALICE_PUB.to_string()),
                public_key_path: None,
                access_level: 10,
            },
        );
        config.keys.insert(
            "mallory".to_string(),
            MemoryKeyEntry {
                public_key: None,
                public_key_path: Some(path.to_string_lossy().to_string()),
                access_level: 1,
            },
        );

        let registry = MemoryKeyRegistry::from_config(&config, KeyFamily::Rsa).unwrap();
        let all = registry.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["alice"].access_level, 10);
        assert_eq!(all["mallory"].access_level, 1);
    }

    #[test]
    fn test_from_config_requires_key_material() {
        let mut config = MemoryRegistryConfig::default();
        config
            .keys
            .insert("alice".to_string(), MemoryKeyEntry::default());
        assert!(matches!(
            MemoryKeyRegistry::from_config(&config, KeyFamily::Rsa),
            Err(RegistryError::InvalidInput(_))
        ));
    }
}
