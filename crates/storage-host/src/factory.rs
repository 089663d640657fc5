//! Host storage factories keyed by storage type

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use cloud_storage_config::AgentConfig;
use cloud_storage_core::{StorageError, StorageResult};
use cloud_storage_types::StorageType;

use crate::initiator::{Initiator, IscsiAdm};
use crate::iscsi::IscsiStorage;
use crate::storage::HostStorage;

/// Builds an unloaded host storage for a mount point.
pub type HostStorageFactory = Box<dyn Fn(&str) -> Box<dyn HostStorage> + Send + Sync>;

/// Factory for iSCSI storages sharing one initiator.
pub fn iscsi_factory(config: AgentConfig, initiator: Arc<dyn Initiator>) -> HostStorageFactory {
    Box::new(move |mount_point: &str| -> Box<dyn HostStorage> {
        Box::new(IscsiStorage::new(mount_point, &config, initiator.clone()))
    })
}

#[derive(Default)]
pub struct StorageFactoryRegistryBuilder {
    factories: HashMap<StorageType, HostStorageFactory>,
}

impl StorageFactoryRegistryBuilder {
    pub fn register(mut self, storage_type: StorageType, factory: HostStorageFactory) -> Self {
        if self.factories.insert(storage_type, factory).is_some() {
            warn!("Replacing host storage factory for type {}", storage_type);
        }
        debug!("Registered host storage factory: {}", storage_type);
        self
    }

    pub fn build(self) -> StorageFactoryRegistry {
        info!(
            "Host storage factory registry frozen with {} type(s)",
            self.factories.len()
        );
        StorageFactoryRegistry {
            factories: self.factories,
        }
    }
}

pub struct StorageFactoryRegistry {
    factories: HashMap<StorageType, HostStorageFactory>,
}

impl StorageFactoryRegistry {
    pub fn builder() -> StorageFactoryRegistryBuilder {
        StorageFactoryRegistryBuilder::default()
    }

    /// Registry with iSCSI storages driven by the system `iscsiadm`.
    pub fn with_defaults(config: &AgentConfig) -> Self {
        let initiator: Arc<dyn Initiator> = Arc::new(IscsiAdm::new(
            config.iscsiadm_path.clone(),
            config.command_timeout(),
        ));
        Self::builder()
            .register(StorageType::Iscsi, iscsi_factory(config.clone(), initiator))
            .build()
    }

    pub fn new_storage(&self, storage_type: StorageType, mount_point: &str) -> StorageResult<Box<dyn HostStorage>> {
        let factory = self
            .factories
            .get(&storage_type)
            .ok_or_else(|| StorageError::unsupported(&format!("host storage type {}", storage_type)))?;
        Ok(factory(mount_point))
    }

    pub fn supports(&self, storage_type: StorageType) -> bool {
        self.factories.contains_key(&storage_type)
    }
}
