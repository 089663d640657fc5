//! Storage driver registry
//!
//! Drivers are registered through a builder during process start. The
//! built registry has no mutation API and is shared read-only.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};

use cloud_storage_config::AgentConfig;
use cloud_storage_core::{StorageError, StorageRepository, StorageResult};
use cloud_storage_types::StorageType;

use crate::driver::StorageDriver;
use crate::iscsi::IscsiStorageDriver;

#[derive(Default)]
pub struct DriverRegistryBuilder {
    drivers: HashMap<StorageType, Arc<dyn StorageDriver>>,
}

impl DriverRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own storage type. A second driver for the
    /// same type replaces the first.
    pub fn register(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        let storage_type = driver.storage_type();
        if self.drivers.insert(storage_type, driver).is_some() {
            warn!("Replacing storage driver for type {}", storage_type);
        }
        debug!("Registered storage driver: {}", storage_type);
        self
    }

    pub fn build(self) -> DriverRegistry {
        info!("Storage driver registry frozen with {} driver(s)", self.drivers.len());
        DriverRegistry {
            drivers: self.drivers,
        }
    }
}

pub struct DriverRegistry {
    drivers: HashMap<StorageType, Arc<dyn StorageDriver>>,
}

impl DriverRegistry {
    pub fn builder() -> DriverRegistryBuilder {
        DriverRegistryBuilder::new()
    }

    /// Registry with the built-in iSCSI driver.
    pub fn with_defaults(config: &AgentConfig, repository: Arc<dyn StorageRepository>) -> Self {
        Self::builder()
            .register(Arc::new(IscsiStorageDriver::from_config(config, repository)))
            .build()
    }

    pub fn driver(&self, storage_type: StorageType) -> StorageResult<Arc<dyn StorageDriver>> {
        self.drivers
            .get(&storage_type)
            .cloned()
            .ok_or_else(|| StorageError::unsupported(&format!("storage type {}", storage_type)))
    }

    pub fn storage_types(&self) -> Vec<StorageType> {
        let mut types: Vec<StorageType> = self.drivers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloud_storage_core::InMemoryStorageRepository;

    #[test]
    fn test_default_registry_has_iscsi() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let registry = DriverRegistry::with_defaults(&AgentConfig::default(), repo);

        assert_eq!(registry.storage_types(), vec![StorageType::Iscsi]);
        let driver = registry.driver(StorageType::Iscsi).unwrap();
        assert_eq!(driver.storage_type(), StorageType::Iscsi);
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let registry = DriverRegistry::builder().build();
        let err = registry.driver(StorageType::Nfs).err().unwrap();
        assert!(err.is_unsupported());
    }
}
