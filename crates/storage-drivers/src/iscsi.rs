//! iSCSI control-plane driver

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::error;

use cloud_storage_config::AgentConfig;
use cloud_storage_core::{StorageRepository, StorageResult};
use cloud_storage_types::{StorageCreateInput, StorageRecord, StorageType, StorageUpdateInput};
use cloud_storage_validate::{ConnectivityProbe, IscsiConfigValidator, TcpProbe};

use crate::driver::{BaseStorageDriver, StorageDriver};
use crate::reconcile::{CacheReconciler, ReconcileOutcome};

pub struct IscsiStorageDriver {
    base: BaseStorageDriver,
    validator: IscsiConfigValidator,
    repository: Arc<dyn StorageRepository>,
    reconciler: CacheReconciler,
}

impl IscsiStorageDriver {
    pub fn new(
        repository: Arc<dyn StorageRepository>,
        probe: Arc<dyn ConnectivityProbe>,
        default_image_cache_dir: PathBuf,
    ) -> Self {
        Self {
            base: BaseStorageDriver::new(StorageType::Iscsi),
            validator: IscsiConfigValidator::new(probe),
            reconciler: CacheReconciler::new(repository.clone(), default_image_cache_dir),
            repository,
        }
    }

    /// Driver probing portals over TCP with the configured timeout.
    pub fn from_config(config: &AgentConfig, repository: Arc<dyn StorageRepository>) -> Self {
        Self::new(
            repository,
            Arc::new(TcpProbe::new(config.probe_timeout())),
            config.default_image_cache_dir.clone(),
        )
    }

    /// Reconcile and report what happened; `post_create` is the logging
    /// wrapper around this.
    pub async fn reconcile_cache(&self, storage: &mut StorageRecord) -> StorageResult<ReconcileOutcome> {
        self.reconciler.reconcile(storage).await
    }
}

#[async_trait]
impl StorageDriver for IscsiStorageDriver {
    fn storage_type(&self) -> StorageType {
        self.base.storage_type()
    }

    async fn validate_create_data(&self, input: &mut StorageCreateInput) -> StorageResult<()> {
        self.base.validate_create_data(input)?;
        self.validator
            .validate_create(input, self.repository.as_ref())
            .await
    }

    async fn post_create(&self, storage: &mut StorageRecord) {
        if let Err(e) = self.reconcile_cache(storage).await {
            error!(
                "Cache reconciliation for iSCSI storage {} failed, left {}: {}",
                storage.name, storage.status, e
            );
        }
    }

    async fn validate_update_data(&self, input: &mut StorageUpdateInput) -> StorageResult<()> {
        self.validator.validate_update(input).await?;
        self.base.validate_update_data(input)
    }
}
