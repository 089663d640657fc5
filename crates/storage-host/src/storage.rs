//! Host storage contract and the shared pieces concrete storages compose

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use cloud_storage_core::{StorageError, StorageResult};
use cloud_storage_types::{StorageStatus, StorageType};

/// Payload a host agent pushes to the control plane for a loaded storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSyncInfo {
    pub name: String,
    pub status: StorageStatus,
    pub zone: Option<String>,
}

/// Where a disk finds its block device.
#[async_trait]
pub trait BlockDeviceSource: Send + Sync {
    /// The resolved device while the owning storage is attached.
    async fn attached_device(&self) -> Option<PathBuf>;
}

#[async_trait]
pub trait Disk: Send + Sync {
    fn id(&self) -> &str;

    async fn path(&self) -> Option<PathBuf>;

    /// Succeeds when the backing device is attached and present.
    async fn probe(&self) -> StorageResult<()>;
}

/// A disk that is a plain local block device.
pub struct LocalDisk {
    id: String,
    source: Arc<dyn BlockDeviceSource>,
}

impl LocalDisk {
    pub fn new(id: &str, source: Arc<dyn BlockDeviceSource>) -> Self {
        Self {
            id: id.to_string(),
            source,
        }
    }
}

#[async_trait]
impl Disk for LocalDisk {
    fn id(&self) -> &str {
        &self.id
    }

    async fn path(&self) -> Option<PathBuf> {
        self.source.attached_device().await
    }

    async fn probe(&self) -> StorageResult<()> {
        let device = self
            .source
            .attached_device()
            .await
            .ok_or_else(|| StorageError::DeviceNotFound {
                message: format!("disk {}: storage is not attached", self.id),
            })?;

        tokio::fs::metadata(&device)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::DeviceNotFound {
                message: format!("disk {}: device {} not accessible: {}", self.id, device.display(), e),
            })
    }
}

/// Identity and disk bookkeeping shared by host storages. Concrete
/// storages hold one and forward to it.
pub struct BaseStorage {
    storage_id: String,
    storage_name: String,
    mount_point: String,
    zone_id: Option<String>,
    storage_conf: Value,
    disks: Mutex<Vec<Arc<dyn Disk>>>,
}

impl BaseStorage {
    pub fn new(mount_point: &str) -> Self {
        Self {
            storage_id: String::new(),
            storage_name: String::new(),
            mount_point: mount_point.to_string(),
            zone_id: None,
            storage_conf: Value::Null,
            disks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_info(&mut self, storage_id: &str, storage_name: &str, conf: &Value) {
        self.storage_id = storage_id.to_string();
        self.storage_name = storage_name.to_string();
        if conf.is_object() {
            self.storage_conf = conf.clone();
        }
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn storage_conf(&self) -> &Value {
        &self.storage_conf
    }

    pub fn zone_id(&self) -> Option<&str> {
        self.zone_id.as_deref()
    }

    pub fn set_zone_id(&mut self, zone_id: Option<String>) {
        self.zone_id = zone_id;
    }

    pub async fn add_disk(&self, disk: Arc<dyn Disk>) {
        debug!("Storage {} tracks disk {}", self.storage_name, disk.id());
        self.disks.lock().await.push(disk);
    }

    pub async fn find_disk(&self, disk_id: &str) -> Option<Arc<dyn Disk>> {
        self.disks
            .lock()
            .await
            .iter()
            .find(|disk| disk.id() == disk_id)
            .cloned()
    }

    /// Returns whether a disk was removed.
    pub async fn remove_disk(&self, disk_id: &str) -> bool {
        let mut disks = self.disks.lock().await;
        match disks.iter().position(|disk| disk.id() == disk_id) {
            Some(index) => {
                disks.remove(index);
                true
            }
            None => false,
        }
    }

    pub async fn disk_count(&self) -> usize {
        self.disks.lock().await.len()
    }
}

/// Host-side storage contract used by the host agent.
#[async_trait]
pub trait HostStorage: Send + Sync {
    fn storage_type(&self) -> StorageType;
    fn storage_id(&self) -> &str;
    fn storage_name(&self) -> &str;
    fn is_local(&self) -> bool;
    fn lvmlockd(&self) -> bool;

    /// Load identity and backend configuration from the control plane.
    fn set_storage_info(&mut self, storage_id: &str, storage_name: &str, conf: &Value) -> StorageResult<()>;
    fn set_zone_id(&mut self, zone_id: Option<String>);

    /// Adopt kernel state left behind by a previous agent process.
    /// Returns whether the storage is attached afterwards.
    async fn reconcile_session(&self) -> StorageResult<bool>;

    async fn mount(&self) -> StorageResult<()>;
    async fn unmount(&self) -> StorageResult<()>;
    async fn detach(&self) -> StorageResult<()>;
    async fn accessible(&self) -> StorageResult<()>;
    async fn is_connected(&self) -> bool;

    /// `None` when the backend does not track size.
    fn capacity_mb(&self) -> Option<u64>;
    fn free_size_mb(&self) -> Option<u64>;

    async fn create_disk(&self, disk_id: &str) -> Arc<dyn Disk>;
    async fn remove_disk(&self, disk_id: &str);
    async fn get_disk_by_id(&self, disk_id: &str) -> StorageResult<Arc<dyn Disk>>;
    fn disks_path(&self) -> Vec<PathBuf>;

    fn snapshot_dir(&self) -> Option<PathBuf>;
    fn snapshot_path(&self, disk_id: &str, snapshot_id: &str) -> Option<PathBuf>;
    fn backup_dir(&self) -> Option<PathBuf>;
    fn fuse_tmp_path(&self) -> Option<PathBuf>;
    fn fuse_mount_path(&self) -> Option<PathBuf>;
    fn imgsave_backup_path(&self) -> Option<PathBuf>;
    fn clone_target_disk_path(&self, target_disk_id: &str) -> Option<PathBuf>;

    async fn is_snapshot_exist(&self, disk_id: &str, snapshot_id: &str) -> StorageResult<bool>;
    async fn create_snapshot_from_url(&self, url: &str, disk_id: &str, snapshot_path: &str) -> StorageResult<()>;
    async fn delete_snapshot(&self, params: &Value) -> StorageResult<Value>;
    async fn delete_snapshots(&self, params: &Value) -> StorageResult<Value>;
    async fn create_disk_from_snapshot(&self, disk: &dyn Disk, params: &Value) -> StorageResult<Value>;
    async fn create_disk_from_existing_path(&self, disk: &dyn Disk, params: &Value) -> StorageResult<()>;
    async fn create_disk_from_backup(&self, disk: &dyn Disk, params: &Value) -> StorageResult<()>;
    async fn storage_backup(&self, params: &Value) -> StorageResult<Value>;
    async fn storage_backup_recovery(&self, params: &Value) -> StorageResult<Value>;
    async fn save_to_image_service(&self, params: &Value) -> StorageResult<Value>;
    async fn delete_diskfile(&self, disk_path: &str, skip_recycle: bool) -> StorageResult<()>;
    async fn clone_disk_from_storage(
        &self,
        src_disk: &dyn Disk,
        target_disk_id: &str,
        full_copy: bool,
    ) -> StorageResult<Value>;
    async fn disk_migrate(&self, params: &Value) -> StorageResult<Value>;
    async fn destination_prepare_migrate(&self, params: &Value) -> StorageResult<()>;

    async fn clean_recycle_diskfiles(&self);

    fn sync_info(&self) -> StorageSyncInfo;
}
