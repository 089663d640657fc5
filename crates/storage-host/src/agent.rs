//! Host agent entry point for bringing a storage record under management

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use cloud_storage_types::StorageRecord;

use crate::factory::StorageFactoryRegistry;
use crate::storage::HostStorage;

/// Build a host storage for `record`, load its configuration and adopt any
/// session the kernel still holds from a previous agent run.
pub async fn load_storage(
    registry: &StorageFactoryRegistry,
    record: &StorageRecord,
    mount_point: &str,
) -> Result<Box<dyn HostStorage>> {
    let mut storage = registry
        .new_storage(record.storage_type, mount_point)
        .with_context(|| format!("create host storage for {}", record.name))?;

    storage
        .set_storage_info(&record.id, &record.name, &record.storage_conf)
        .with_context(|| format!("load configuration of storage {}", record.name))?;
    storage.set_zone_id(record.zone_id.clone());

    match storage.reconcile_session().await {
        Ok(true) => info!("Storage {} is attached", record.name),
        Ok(false) => debug!("Storage {} is not attached", record.name),
        Err(e) => warn!("Could not inspect sessions for storage {}: {}", record.name, e),
    }

    Ok(storage)
}
