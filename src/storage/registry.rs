//! Driver registry: constructors keyed by backend type.
//!
//! Drivers are registered at startup (or by embedding applications at any
//! point before use) and instantiated by name from [`StorageConfig`].  This
//! replaces lazy module loading with an explicit constructor table.

use std::{collections::HashMap, sync::Arc};

use crate::config::StorageConfig;

use super::{
    backend::{KvBackend, StorageError},
    memory::MemoryKvBackend,
    sqlite::SqliteKvBackend,
};

/// Constructor signature for a storage driver.
pub type BackendCtor =
    Arc<dyn Fn(&StorageConfig) -> Result<Arc<dyn KvBackend>, StorageError> + Send + Sync>;

/// Registry of storage driver constructors.
pub struct BackendRegistry {
    ctors: HashMap<String, BackendCtor>,
}

impl BackendRegistry {
    /// Registry with the built-in `memory` and `sqlite` drivers.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self {
            ctors: HashMap::new(),
        };
        registry.register("memory", Arc::new(|_config: &StorageConfig| {
            Ok(Arc::new(MemoryKvBackend::new()) as Arc<dyn KvBackend>)
        }));
        registry.register("sqlite", Arc::new(|config: &StorageConfig| {
            let path = config
                .path
                .clone()
                .unwrap_or_else(|| {
                    crate::config::engram_dir()
                        .join("engram.db")
                        .to_string_lossy()
                        .into_owned()
                });
            Ok(Arc::new(SqliteKvBackend::new(path)) as Arc<dyn KvBackend>)
        }));
        registry
    }

    /// Register (or replace) a driver constructor under `name`.
    pub fn register(&mut self, name: impl Into<String>, ctor: BackendCtor) {
        self.ctors.insert(name.into(), ctor);
    }

    /// Instantiate the driver named in `config.backend` (not yet connected).
    pub fn create(&self, config: &StorageConfig) -> Result<Arc<dyn KvBackend>, StorageError> {
        let ctor = self.ctors.get(&config.backend).ok_or_else(|| {
            StorageError::Backend(format!("unknown storage backend '{}'", config.backend))
        })?;
        ctor(config)
    }

    pub fn driver_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ctors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin_drivers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_drivers_registered() {
        let registry = BackendRegistry::with_builtin_drivers();
        assert_eq!(registry.driver_names(), vec!["memory", "sqlite"]);
    }

    #[tokio::test]
    async fn create_memory_driver() {
        let registry = BackendRegistry::with_builtin_drivers();
        let config = StorageConfig {
            backend: "memory".to_owned(),
            path: None,
        };
        let backend = registry.create(&config).unwrap();
        assert_eq!(backend.kind(), "memory");
        assert!(!backend.is_connected());
    }

    #[test]
    fn unknown_driver_errors() {
        let registry = BackendRegistry::with_builtin_drivers();
        let config = StorageConfig {
            backend: "etcd".to_owned(),
            path: None,
        };
        assert!(registry.create(&config).is_err());
    }

    #[tokio::test]
    async fn custom_driver_selectable_at_runtime() {
        let mut registry = BackendRegistry::with_builtin_drivers();
        registry.register("custom", Arc::new(|_c: &StorageConfig| {
            Ok(Arc::new(MemoryKvBackend::new()) as Arc<dyn KvBackend>)
        }));
        let config = StorageConfig {
            backend: "custom".to_owned(),
            path: None,
        };
        assert!(registry.create(&config).is_ok());
    }
}
