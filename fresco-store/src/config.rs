//! Configuration loading for fresco stores.
//!
//! [`FrescoConfig`] selects the persistence backend and the defaults handed
//! to every store. It loads from a TOML file (`deny_unknown_fields`) or from
//! environment variables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fresco_core::{ConfigError, FrescoResult};
use serde::Deserialize;

use crate::persist::{CachePersister, ChangeFeed, InMemoryPersister, LmdbPersister, SqlitePersister};

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

/// Per-store behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Keep streams open after the fetch and re-emit later writes to the row.
    pub live_updates: bool,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable live updates.
    pub fn with_live_updates(mut self, enabled: bool) -> Self {
        self.live_updates = enabled;
        self
    }
}

// ============================================================================
// PERSISTENCE CONFIGURATION
// ============================================================================

/// Which backend holds cache lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case", deny_unknown_fields)]
pub enum PersistenceConfig {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
    Lmdb { path: PathBuf, max_size_mb: usize },
}

// ============================================================================
// TOP-LEVEL CONFIGURATION
// ============================================================================

fn default_change_buffer() -> usize {
    ChangeFeed::DEFAULT_CAPACITY
}

/// Default LMDB map size when only a path is configured.
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 64;

/// Largest accepted LMDB map size (1 TiB).
pub const MAX_LMDB_MAX_SIZE_MB: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrescoConfig {
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Per-subscriber buffer of the persister's change feed.
    #[serde(default = "default_change_buffer")]
    pub change_buffer: usize,
    /// Default for [`StoreConfig::live_updates`].
    #[serde(default)]
    pub live_updates: bool,
}

impl Default for FrescoConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceConfig::Memory,
            change_buffer: default_change_buffer(),
            live_updates: false,
        }
    }
}

impl FrescoConfig {
    /// Load from the TOML file named by `FRESCO_CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("FRESCO_CONFIG").map_err(|_| ConfigError::MissingRequired {
            field: "FRESCO_CONFIG".to_string(),
        })?;
        let config = Self::from_path(Path::new(&path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Load from environment variables.
    ///
    /// - `FRESCO_PERSISTENCE`: `memory` (default), `sqlite`, or `lmdb`
    /// - `FRESCO_CACHE_PATH`: database file or directory; required unless memory
    /// - `FRESCO_LMDB_MAX_SIZE_MB`: LMDB map size (default: 64)
    /// - `FRESCO_CHANGE_BUFFER`: change feed buffer (default: 256)
    /// - `FRESCO_LIVE_UPDATES`: `true` to keep streams open (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = lookup("FRESCO_PERSISTENCE")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "memory".to_string());

        let cache_path = || {
            lookup("FRESCO_CACHE_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: "FRESCO_CACHE_PATH".to_string(),
                })
        };

        let persistence = match backend.as_str() {
            "memory" => PersistenceConfig::Memory,
            "sqlite" => PersistenceConfig::Sqlite { path: cache_path()? },
            "lmdb" => PersistenceConfig::Lmdb {
                path: cache_path()?,
                max_size_mb: parse_var(&lookup, "FRESCO_LMDB_MAX_SIZE_MB")?
                    .unwrap_or(DEFAULT_LMDB_MAX_SIZE_MB),
            },
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "FRESCO_PERSISTENCE".to_string(),
                    value: other.to_string(),
                    reason: "expected memory, sqlite or lmdb".to_string(),
                })
            }
        };

        let change_buffer =
            parse_var(&lookup, "FRESCO_CHANGE_BUFFER")?.unwrap_or_else(default_change_buffer);

        let live_updates = lookup("FRESCO_LIVE_UPDATES")
            .map(|s| s.trim().to_lowercase() == "true")
            .unwrap_or(false);

        let config = Self {
            persistence,
            change_buffer,
            live_updates,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.change_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "change_buffer".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        match &self.persistence {
            PersistenceConfig::Memory => {}
            PersistenceConfig::Sqlite { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "persistence.path".to_string(),
                        value: String::new(),
                        reason: "must not be empty".to_string(),
                    });
                }
            }
            PersistenceConfig::Lmdb { path, max_size_mb } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "persistence.path".to_string(),
                        value: String::new(),
                        reason: "must not be empty".to_string(),
                    });
                }
                if *max_size_mb == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "persistence.max_size_mb".to_string(),
                        value: "0".to_string(),
                        reason: "must be > 0".to_string(),
                    });
                }
                if *max_size_mb > MAX_LMDB_MAX_SIZE_MB {
                    return Err(ConfigError::InvalidValue {
                        field: "persistence.max_size_mb".to_string(),
                        value: max_size_mb.to_string(),
                        reason: format!("must be <= {}", MAX_LMDB_MAX_SIZE_MB),
                    });
                }
            }
        }
        Ok(())
    }

    /// Open the configured backend.
    pub fn open_persister(&self) -> FrescoResult<Arc<dyn CachePersister>> {
        self.validate()?;
        let persister: Arc<dyn CachePersister> = match &self.persistence {
            PersistenceConfig::Memory => {
                Arc::new(InMemoryPersister::with_change_buffer(self.change_buffer))
            }
            PersistenceConfig::Sqlite { path } => Arc::new(
                SqlitePersister::open_with_change_buffer(path, self.change_buffer)?,
            ),
            PersistenceConfig::Lmdb { path, max_size_mb } => Arc::new(
                LmdbPersister::open_with_change_buffer(path, *max_size_mb, self.change_buffer)?,
            ),
        };
        tracing::info!(
            backend = persister.backend_name(),
            change_buffer = self.change_buffer,
            "Opened cache persister"
        );
        Ok(persister)
    }

    /// Store defaults derived from this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default().with_live_updates(self.live_updates)
    }
}

fn parse_var<F>(lookup: &F, name: &str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::new().with_live_updates(true);
        assert!(config.live_updates);
        assert!(!StoreConfig::default().live_updates);
    }

    #[test]
    fn test_toml_defaults() {
        let config = FrescoConfig::from_toml_str("").unwrap();
        assert_eq!(config, FrescoConfig::default());
    }

    #[test]
    fn test_toml_sqlite() {
        let config = FrescoConfig::from_toml_str(
            r#"
            change_buffer = 32
            live_updates = true

            [persistence]
            backend = "sqlite"
            path = "/var/cache/fresco.db"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.persistence,
            PersistenceConfig::Sqlite {
                path: PathBuf::from("/var/cache/fresco.db")
            }
        );
        assert_eq!(config.change_buffer, 32);
        assert!(config.store_config().live_updates);
    }

    #[test]
    fn test_toml_rejects_unknown_fields() {
        let err = FrescoConfig::from_toml_str("retries = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let config = FrescoConfig {
            change_buffer: 0,
            ..FrescoConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_bounds_lmdb_map_size() {
        let lmdb = |max_size_mb| FrescoConfig {
            persistence: PersistenceConfig::Lmdb {
                path: PathBuf::from("/tmp/fresco-lmdb"),
                max_size_mb,
            },
            ..FrescoConfig::default()
        };
        assert!(lmdb(MAX_LMDB_MAX_SIZE_MB).validate().is_ok());

        let config = lmdb(usize::MAX / 1024);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "persistence.max_size_mb"
        ));
        assert!(config.open_persister().is_err());

        let err = FrescoConfig::from_lookup(lookup_from(&[
            ("FRESCO_PERSISTENCE", "lmdb"),
            ("FRESCO_CACHE_PATH", "/tmp/fresco-lmdb"),
            ("FRESCO_LMDB_MAX_SIZE_MB", "18014398509481983"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_lookup_defaults_to_memory() {
        let config = FrescoConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, FrescoConfig::default());
    }

    #[test]
    fn test_from_lookup_lmdb() {
        let config = FrescoConfig::from_lookup(lookup_from(&[
            ("FRESCO_PERSISTENCE", "LMDB"),
            ("FRESCO_CACHE_PATH", "/tmp/fresco"),
            ("FRESCO_LMDB_MAX_SIZE_MB", "128"),
            ("FRESCO_LIVE_UPDATES", "true"),
        ]))
        .unwrap();

        assert_eq!(
            config.persistence,
            PersistenceConfig::Lmdb {
                path: PathBuf::from("/tmp/fresco"),
                max_size_mb: 128
            }
        );
        assert!(config.live_updates);
    }

    #[test]
    fn test_from_lookup_requires_path() {
        let err = FrescoConfig::from_lookup(lookup_from(&[("FRESCO_PERSISTENCE", "sqlite")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "FRESCO_CACHE_PATH".to_string()
            }
        );
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let err = FrescoConfig::from_lookup(lookup_from(&[("FRESCO_CHANGE_BUFFER", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "FRESCO_CHANGE_BUFFER"));
    }

    #[test]
    fn test_from_lookup_rejects_unknown_backend() {
        let err = FrescoConfig::from_lookup(lookup_from(&[("FRESCO_PERSISTENCE", "redis")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_path_and_open_sqlite() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("cache.db");
        let config_path = dir.path().join("fresco.toml");
        std::fs::write(
            &config_path,
            format!(
                "[persistence]\nbackend = \"sqlite\"\npath = {:?}\n",
                db_path.to_string_lossy()
            ),
        )
        .unwrap();

        let config = FrescoConfig::from_path(&config_path).unwrap();
        let persister = config.open_persister().unwrap();
        assert_eq!(persister.backend_name(), "sqlite");
        assert!(db_path.exists());
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = FrescoConfig::from_path(Path::new("/nonexistent/fresco.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
