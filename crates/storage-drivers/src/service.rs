//! Storage creation and update flow
//!
//! Creations are serialized end to end (validate, insert, post-create) so
//! two requests for the same connection identity cannot both pass the
//! duplicate scan.

use std::sync::Arc;

use log::info;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use cloud_storage_core::{StorageRepository, StorageResult};
use cloud_storage_types::{StorageCreateInput, StorageRecord, StorageUpdateInput};

use crate::registry::DriverRegistry;

pub struct StorageService {
    registry: DriverRegistry,
    repository: Arc<dyn StorageRepository>,
    create_lock: Mutex<()>,
}

impl StorageService {
    pub fn new(registry: DriverRegistry, repository: Arc<dyn StorageRepository>) -> Self {
        Self {
            registry,
            repository,
            create_lock: Mutex::new(()),
        }
    }

    /// Validate, persist as offline, reconcile, and return the stored record.
    pub async fn create_storage(&self, mut input: StorageCreateInput) -> StorageResult<StorageRecord> {
        let _guard = self.create_lock.lock().await;

        let driver = self.registry.driver(input.storage_type)?;
        driver.validate_create_data(&mut input).await?;

        let mut record = StorageRecord::new(
            Uuid::new_v4().to_string(),
            input.name.clone(),
            input.storage_type,
            input.storage_conf.clone(),
        );
        record.zone_id = input.zone_id.clone();

        let mut record = self.repository.insert_storage(record).await?;
        info!("Created {} storage {} ({})", record.storage_type, record.name, record.id);

        driver.post_create(&mut record).await;
        self.repository.get_storage(&record.id).await
    }

    /// Apply an update. The stored configuration blob is replaced only when
    /// the driver flagged it as changed.
    pub async fn update_storage(
        &self,
        id: &str,
        input: StorageUpdateInput,
    ) -> StorageResult<StorageRecord> {
        let mut record = self.repository.get_storage(id).await?;
        let driver = self.registry.driver(record.storage_type)?;

        let mut input = input.with_storage_conf(&record.storage_conf);
        driver.validate_update_data(&mut input).await?;

        if let Some(name) = input.name.take() {
            record.name = name;
        }
        if input.update_storage_conf {
            record.storage_conf = Value::Object(input.storage_conf);
            info!("Updated configuration of storage {}", record.name);
        }
        self.repository.update_storage(&record).await?;
        Ok(record)
    }
}
