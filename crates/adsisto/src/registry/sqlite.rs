//! SQLite key registry.
//!
//! Every statement is configurable so the registry can sit on top of an
//! existing table. Leaving a statement empty disables the matching operation,
//! which then answers `NotImplemented`.
//!
//! Statement contract (positional binds):
//! - `select`: binds `identity`, returns `(public_key, access_level)`
//! - `index`: no binds, returns `(identity, public_key, access_level)`
//! - `insert`: binds `identity, public_key, access_level`
//! - `update`: binds `public_key, access_level, identity`
//! - `delete`: binds `identity`

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use super::{KeyRecord, KeyRegistry, RegistryConfig, RegistryError, validate_entry};
use crate::auth::KeyFamily;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS authorised_keys (
    identity TEXT PRIMARY KEY NOT NULL,
    public_key TEXT NOT NULL,
    access_level INTEGER NOT NULL DEFAULT 0
)";

/// SQL statements used by the sqlite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteQueries {
    pub select: String,
    pub index: String,
    pub insert: String,
    pub update: String,
    pub delete: String,
}

impl Default for SqliteQueries {
    fn default() -> Self {
        Self {
            select: "SELECT public_key, access_level FROM authorised_keys WHERE identity = ?"
                .to_string(),
            index: "SELECT identity, public_key, access_level FROM authorised_keys ORDER BY identity"
                .to_string(),
            insert:
                "INSERT INTO authorised_keys (identity, public_key, access_level) VALUES (?, ?, ?)"
                    .to_string(),
            update: "UPDATE authorised_keys SET public_key = ?, access_level = ? WHERE identity = ?"
                .to_string(),
            delete: "DELETE FROM authorised_keys WHERE identity = ?".to_string(),
        }
    }
}

/// Settings for the `sqlite` backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteRegistryConfig {
    /// Connection URL, e.g. `sqlite://~/.local/share/adsisto/keys.db`.
    pub url: String,
    /// Create the default `authorised_keys` table on first use.
    pub create_schema: bool,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub queries: SqliteQueries,
}

impl Default for SqliteRegistryConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://~/.local/share/adsisto/keys.db".to_string(),
            create_schema: true,
            max_connections: 4,
            acquire_timeout_ms: 2000,
            queries: SqliteQueries::default(),
        }
    }
}

/// Registry stored in a SQLite database.
///
/// The pool is opened on first use, so a missing database does not stop the
/// server from starting; lookups fail with `Backend` until it is reachable.
pub struct SqliteKeyRegistry {
    config: SqliteRegistryConfig,
    family: KeyFamily,
    pool: OnceCell<SqlitePool>,
}

impl SqliteKeyRegistry {
    pub fn new(config: SqliteRegistryConfig, family: KeyFamily) -> Result<Self, RegistryError> {
        if config.url.trim().is_empty() {
            return Err(RegistryError::InvalidInput(
                "sqlite registry url is empty".to_string(),
            ));
        }
        Ok(Self {
            config,
            family,
            pool: OnceCell::new(),
        })
    }

    async fn pool(&self) -> Result<&SqlitePool, RegistryError> {
        self.pool
            .get_or_try_init(|| async {
                let url = shellexpand::tilde(&self.config.url).to_string();
                let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
                if let Some(parent) = options.get_filename().parent()
                    && !parent.as_os_str().is_empty()
                {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        RegistryError::Backend(format!("failed to create database directory: {e}"))
                    })?;
                }

                let pool = SqlitePoolOptions::new()
                    .max_connections(self.config.max_connections.max(1))
                    .acquire_timeout(Duration::from_millis(self.config.acquire_timeout_ms))
                    .connect_with(options)
                    .await?;

                if self.config.create_schema {
                    sqlx::query(SCHEMA).execute(&pool).await?;
                }
                debug!(url = %self.config.url, "opened sqlite key registry");
                Ok::<_, RegistryError>(pool)
            })
            .await
    }

    fn statement<'a>(&self, sql: &'a str) -> Result<&'a str, RegistryError> {
        if sql.trim().is_empty() {
            return Err(RegistryError::NotImplemented);
        }
        Ok(sql)
    }
}

fn access_level_from_db(value: i64) -> Result<u32, RegistryError> {
    u32::try_from(value)
        .map_err(|_| RegistryError::Backend(format!("stored access level out of range: {value}")))
}

fn write_error(err: sqlx::Error, identity: &str) -> RegistryError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.is_unique_violation()
    {
        return RegistryError::InvalidInput(format!("identity already registered: {identity}"));
    }
    RegistryError::from(err)
}

pub(super) fn build(
    config: &RegistryConfig,
    family: KeyFamily,
) -> Result<Arc<dyn KeyRegistry>, RegistryError> {
    Ok(Arc::new(SqliteKeyRegistry::new(config.sqlite.clone(), family)?))
}

#[async_trait]
impl KeyRegistry for SqliteKeyRegistry {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self))]
    async fn get(&self, identity: &str) -> Result<Option<KeyRecord>, RegistryError> {
        let sql = self.statement(&self.config.queries.select)?;
        let row: Option<(String, i64)> = sqlx::query_as(sql)
            .bind(identity)
            .fetch_optional(self.pool().await?)
            .await?;

        row.map(|(public_key, level)| {
            Ok(KeyRecord {
                identity: identity.to_string(),
                public_key,
                access_level: access_level_from_db(level)?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn get_all(&self) -> Result<BTreeMap<String, KeyRecord>, RegistryError> {
        let sql = self.statement(&self.config.queries.index)?;
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as(sql).fetch_all(self.pool().await?).await?;

        let mut keys = BTreeMap::new();
        for (identity, public_key, level) in rows {
            keys.insert(
                identity.clone(),
                KeyRecord {
                    identity,
                    public_key,
                    access_level: access_level_from_db(level)?,
                },
            );
        }
        Ok(keys)
    }

    #[instrument(skip(self, public_key))]
    async fn insert(
        &self,
        identity: &str,
        public_key: &str,
        access_level: u32,
    ) -> Result<(), RegistryError> {
        let sql = self.statement(&self.config.queries.insert)?;
        let public_key = validate_entry(self.family, identity, public_key)?;

        sqlx::query(sql)
            .bind(identity)
            .bind(&public_key)
            .bind(i64::from(access_level))
            .execute(self.pool().await?)
            .await
            .map_err(|e| write_error(e, identity))?;
        Ok(())
    }

    #[instrument(skip(self, public_key))]
    async fn update(
        &self,
        identity: &str,
        public_key: &str,
        access_level: u32,
    ) -> Result<(), RegistryError> {
        let sql = self.statement(&self.config.queries.update)?;
        let public_key = validate_entry(self.family, identity, public_key)?;

        let result = sqlx::query(sql)
            .bind(&public_key)
            .bind(i64::from(access_level))
            .bind(identity)
            .execute(self.pool().await?)
            .await
            .map_err(|e| write_error(e, identity))?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::InvalidInput(format!(
                "identity is not registered: {identity}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, identity: &str) -> Result<(), RegistryError> {
        let sql = self.statement(&self.config.queries.delete)?;
        let result = sqlx::query(sql)
            .bind(identity)
            .execute(self.pool().await?)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::InvalidInput(format!(
                "identity is not registered: {identity}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE_PUB: &str = include_str!("../../tests/fixtures/alice_rsa_public.pem");
    const MALLORY_PUB: &str = include_str!("../../tests/fixtures/mallory_rsa_public.pem");

    fn test_config(dir: &tempfile::TempDir) -> SqliteRegistryConfig {
        SqliteRegistryConfig {
            url: format!("sqlite://{}", dir.path().join("keys.db").display()),
            ..SqliteRegistryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SqliteKeyRegistry::new(test_config(&dir), KeyFamily::Rsa).unwrap();

        assert_eq!(registry.get("alice@example.com").await.unwrap(), None);

        registry
            .insert("alice@example.com", ALICE_PUB, 10)
            .await
            .unwrap();
        registry.insert("bob@example.com", MALLORY_PUB, 0).await.unwrap();

        let alice = registry.get("alice@example.com").await.unwrap().unwrap();
        assert_eq!(alice.access_level, 10);

        let all = registry.get_all().await.unwrap();
        assert_eq!(
            all.keys().cloned().collect::<Vec<_>>(),
            vec!["alice@example.com", "bob@example.com"]
        );

        registry
            .update("bob@example.com", ALICE_PUB, 5)
            .await
            .unwrap();
        assert_eq!(
            registry
                .get("bob@example.com")
                .await
                .unwrap()
                .unwrap()
                .access_level,
            5
        );

        registry.delete("bob@example.com").await.unwrap();
        assert_eq!(registry.get("bob@example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_creates_missing_database_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("state").join("adsisto");
        let config = SqliteRegistryConfig {
            url: format!("sqlite://{}", db_dir.join("keys.db").display()),
            ..SqliteRegistryConfig::default()
        };
        let registry = SqliteKeyRegistry::new(config, KeyFamily::Rsa).unwrap();

        registry.insert("alice", ALICE_PUB, 1).await.unwrap();
        assert!(db_dir.is_dir());
        assert!(db_dir.join("keys.db").exists());
        assert_eq!(registry.get("alice").await.unwrap().unwrap().access_level, 1);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SqliteKeyRegistry::new(test_config(&dir), KeyFamily::Rsa).unwrap();

        registry.insert("alice", ALICE_PUB, 1).await.unwrap();
        assert!(matches!(
            registry.insert("alice", ALICE_PUB, 1).await,
            Err(RegistryError::InvalidInput(_))
        ));
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
    async fn test_empty_statement_is_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.queries.insert = String::new();
        config.queries.delete = "  ".to_string();
        let registry = SqliteKeyRegistry::new(config, KeyFamily::Rsa).unwrap();

        assert_eq!(
            registry.insert("alice", ALICE_PUB, 1).await,
            Err(RegistryError::NotImplemented)
        );
        assert_eq!(
            registry.delete("alice").await,
            Err(RegistryError::NotImplemented)
        );
        // Reads still work.
        assert!(registry.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SqliteKeyRegistry::new(test_config(&dir), KeyFamily::Rsa).unwrap();

        assert!(matches!(
            registry.insert("alice", "not a key", 1).await,
            Err(RegistryError::InvalidInput(_))
        ));
        assert!(registry.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_database_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let config = SqliteRegistryConfig {
            url: format!("sqlite://{}", dir.path().display()),
            ..SqliteRegistryConfig::default()
        };
        let registry = SqliteKeyRegistry::new(config, KeyFamily::Rsa).unwrap();

        let err = registry.get("alice").await.unwrap_err();
        assert!(err.is_backend_failure(), "unexpected error: {err:?}");
    }

    #[test]
    fn test_empty_url_rejected() {
        let config = SqliteRegistryConfig {
            url: String::new(),
            ..SqliteRegistryConfig::default()
        };
        assert!(SqliteKeyRegistry::new(config, KeyFamily::Rsa).is_err());
    }
}
