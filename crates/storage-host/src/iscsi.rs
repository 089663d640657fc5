//! iSCSI host storage
//!
//! Drives one storage record through discovery, login and device wait on
//! this host, and tears the session down again on unmount. All attach
//! lifecycle operations hold the runtime write lock for their full
//! duration, so concurrent mount and unmount calls on one instance are
//! serialized.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use cloud_storage_config::AgentConfig;
use cloud_storage_core::{CommandError, StorageError, StorageResult};
use cloud_storage_types::{
    ChapCredentials, IscsiStorageConf, StorageStatus, StorageType,
};

use crate::blockdev::BlockDevice;
use crate::device::DevicePathResolver;
use crate::initiator::{
    parse_sessions, Initiator, InitiatorCommand, AUTH_METHOD_PARAM, AUTH_PASSWORD_PARAM,
    AUTH_USERNAME_PARAM,
};
use crate::state::{ConnectionState, DeviceWaitPolicy, RuntimeState};
use crate::storage::{BaseStorage, BlockDeviceSource, Disk, HostStorage, LocalDisk, StorageSyncInfo};

/// Shared view of the attach state handed to disks.
#[derive(Clone)]
struct AttachedDevice {
    runtime: Arc<RwLock<RuntimeState>>,
}

#[async_trait]
impl BlockDeviceSource for AttachedDevice {
    async fn attached_device(&self) -> Option<PathBuf> {
        let runtime = self.runtime.read().await;
        if runtime.is_connected() {
            runtime.device_path().cloned()
        } else {
            None
        }
    }
}

pub struct IscsiStorage {
    base: BaseStorage,
    conf: Option<IscsiStorageConf>,
    runtime: Arc<RwLock<RuntimeState>>,
    initiator: Arc<dyn Initiator>,
    resolver: DevicePathResolver,
    wait: DeviceWaitPolicy,
    blockdev: BlockDevice,
}

impl IscsiStorage {
    pub fn new(mount_point: &str, config: &AgentConfig, initiator: Arc<dyn Initiator>) -> Self {
        Self {
            base: BaseStorage::new(mount_point),
            conf: None,
            runtime: Arc::new(RwLock::new(RuntimeState::default())),
            initiator,
            resolver: DevicePathResolver::new(&config.device_by_path_dir),
            wait: DeviceWaitPolicy::from(config),
            blockdev: BlockDevice::new(config.blockdev_path.clone(), config.command_timeout()),
        }
    }

    pub fn with_resolver(mut self, resolver: DevicePathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_wait_policy(mut self, wait: DeviceWaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn conf(&self) -> Option<&IscsiStorageConf> {
        self.conf.as_ref()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.runtime.read().await.state()
    }

    pub async fn device_path(&self) -> Option<PathBuf> {
        self.runtime.read().await.device_path().cloned()
    }

    /// Size of an attached block device in MiB.
    pub async fn device_size_mb(&self, device: &Path) -> StorageResult<u64> {
        self.blockdev.size_mb(device).await
    }

    fn require_conf(&self) -> StorageResult<&IscsiStorageConf> {
        self.conf.as_ref().ok_or_else(|| StorageError::BadRequest {
            message: format!("iSCSI configuration not loaded for storage {}", self.base.storage_name()),
        })
    }

    fn device_source(&self) -> Arc<dyn BlockDeviceSource> {
        Arc::new(AttachedDevice {
            runtime: self.runtime.clone(),
        })
    }

    async fn discover(&self, conf: &IscsiStorageConf) -> StorageResult<()> {
        let command = InitiatorCommand::Discovery {
            portal: conf.portal.clone(),
            credentials: conf.credentials(),
        };
        let output = self.initiator.run(&command).await?;
        if !output.success {
            return Err(StorageError::Unreachable {
                message: format!("iscsiadm discovery failed: {}", output.combined()),
            });
        }

        debug!("iSCSI discovery output: {}", output.stdout.trim());
        if !output.stdout.contains(&conf.iqn) {
            return Err(StorageError::Unreachable {
                message: format!("target IQN {} not found in discovery results", conf.iqn),
            });
        }
        Ok(())
    }

    async fn set_node_param(&self, conf: &IscsiStorageConf, name: &str, value: &str) -> StorageResult<()> {
        let command = InitiatorCommand::SetNodeParam {
            iqn: conf.iqn.clone(),
            portal: conf.portal.clone(),
            name: name.to_string(),
            value: value.to_string(),
        };
        let output = self.initiator.run(&command).await?;
        if !output.success {
            return Err(StorageError::Unreachable {
                message: format!("failed to set {}: {}", name, output.combined()),
            });
        }
        Ok(())
    }

    async fn set_chap(&self, conf: &IscsiStorageConf, credentials: &ChapCredentials) -> StorageResult<()> {
        self.set_node_param(conf, AUTH_METHOD_PARAM, "CHAP").await?;
        self.set_node_param(conf, AUTH_USERNAME_PARAM, &credentials.username).await?;
        self.set_node_param(conf, AUTH_PASSWORD_PARAM, &credentials.password).await
    }

    async fn login(&self, conf: &IscsiStorageConf) -> StorageResult<()> {
        if let Some(credentials) = conf.credentials() {
            self.set_chap(conf, &credentials).await?;
        }

        let command = InitiatorCommand::Login {
            iqn: conf.iqn.clone(),
            portal: conf.portal.clone(),
        };
        let output = self.initiator.run(&command).await?;
        if output.success {
            info!("Logged in to iSCSI target {} at {}", conf.iqn, conf.portal);
            Ok(())
        } else if output.contains("already exists") {
            info!("iSCSI session to {} at {} already exists", conf.iqn, conf.portal);
            Ok(())
        } else {
            Err(StorageError::Unreachable {
                message: format!("iscsiadm login failed: {}", output.combined()),
            })
        }
    }

    async fn logout(&self, conf: &IscsiStorageConf) -> StorageResult<()> {
        let command = InitiatorCommand::Logout {
            iqn: conf.iqn.clone(),
            portal: conf.portal.clone(),
        };
        let output = self.initiator.run(&command).await?;
        if output.success || output.contains("not found") || output.contains("No matching sessions") {
            Ok(())
        } else {
            Err(StorageError::Unreachable {
                message: format!("iscsiadm logout failed: {}", output.combined()),
            })
        }
    }

    async fn delete_node(&self, conf: &IscsiStorageConf) -> StorageResult<()> {
        let command = InitiatorCommand::DeleteNode {
            iqn: conf.iqn.clone(),
            portal: conf.portal.clone(),
        };
        let output = self.initiator.run(&command).await?;
        if output.success || output.contains("not found") || output.contains("No records found") {
            Ok(())
        } else {
            Err(CommandError::Failed {
                command: command.to_string(),
                exit_code: output.exit_code,
                output: output.combined(),
            }
            .into())
        }
    }

    /// Poll the resolver until the device shows up or the deadline passes.
    async fn wait_for_device(&self, conf: &IscsiStorageConf) -> StorageResult<PathBuf> {
        let deadline = Instant::now() + self.wait.timeout;
        while Instant::now() < deadline {
            match self
                .resolver
                .resolve(conf.portal_host(), &conf.iqn, conf.lun_id)
                .await
            {
                Ok(path) => return Ok(path),
                Err(e) => debug!("Device for {} lun {} not ready: {}", conf.iqn, conf.lun_id, e),
            }
            sleep(self.wait.interval).await;
        }

        Err(StorageError::Timeout {
            operation: format!(
                "waiting for iSCSI device of {} lun {} to appear",
                conf.iqn, conf.lun_id
            ),
            timeout: self.wait.timeout,
        })
    }

    async fn attach(&self, runtime: &mut RuntimeState, conf: &IscsiStorageConf) -> StorageResult<PathBuf> {
        runtime.enter(ConnectionState::Discovering);
        self.discover(conf).await?;

        runtime.enter(ConnectionState::LoggingIn);
        self.login(conf).await?;

        runtime.enter(ConnectionState::WaitingForDevice);
        match self.wait_for_device(conf).await {
            Ok(path) => Ok(path),
            Err(e) => {
                runtime.enter(ConnectionState::LoggingOut);
                if let Err(logout_err) = self.logout(conf).await {
                    warn!("Rollback logout from {} failed: {}", conf.iqn, logout_err);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl HostStorage for IscsiStorage {
    fn storage_type(&self) -> StorageType {
        StorageType::Iscsi
    }

    fn storage_id(&self) -> &str {
        self.base.storage_id()
    }

    fn storage_name(&self) -> &str {
        self.base.storage_name()
    }

    fn is_local(&self) -> bool {
        false
    }

    fn lvmlockd(&self) -> bool {
        false
    }

    fn set_storage_info(&mut self, storage_id: &str, storage_name: &str, conf: &Value) -> StorageResult<()> {
        let decoded = IscsiStorageConf::from_value(conf)?;
        self.base.set_info(storage_id, storage_name, conf);
        self.conf = Some(decoded);
        Ok(())
    }

    fn set_zone_id(&mut self, zone_id: Option<String>) {
        self.base.set_zone_id(zone_id);
    }

    async fn reconcile_session(&self) -> StorageResult<bool> {
        let conf = self.require_conf()?;
        let mut runtime = self.runtime.write().await;
        if runtime.is_connected() {
            return Ok(true);
        }

        let command = InitiatorCommand::ListSessions;
        let output = self.initiator.run(&command).await?;
        if !output.success {
            if output.contains("No active sessions") {
                return Ok(false);
            }
            return Err(CommandError::Failed {
                command: command.to_string(),
                exit_code: output.exit_code,
                output: output.combined(),
            }
            .into());
        }

        let live = parse_sessions(&output.stdout)
            .iter()
            .any(|session| session.iqn == conf.iqn && session.portal == conf.portal);
        if !live {
            return Ok(false);
        }

        match self
            .resolver
            .resolve(conf.portal_host(), &conf.iqn, conf.lun_id)
            .await
        {
            Ok(path) => {
                info!(
                    "Adopted live iSCSI session to {} at {}, device {}",
                    conf.iqn,
                    conf.portal,
                    path.display()
                );
                runtime.connect(path);
                Ok(true)
            }
            Err(e) => {
                warn!("Live iSCSI session to {} has no usable device: {}", conf.iqn, e);
                Ok(false)
            }
        }
    }

    async fn mount(&self) -> StorageResult<()> {
        let conf = self.require_conf()?;
        let mut runtime = self.runtime.write().await;
        if runtime.is_connected() {
            return Ok(());
        }

        info!(
            "Mounting iSCSI storage {}: target={} iqn={} portal={} lun={}",
            self.base.storage_name(),
            conf.target,
            conf.iqn,
            conf.portal,
            conf.lun_id
        );

        match self.attach(&mut runtime, conf).await {
            Ok(path) => {
                info!(
                    "iSCSI storage {} connected, device {}",
                    self.base.storage_name(),
                    path.display()
                );
                runtime.connect(path);
                Ok(())
            }
            Err(e) => {
                error!("Failed to mount iSCSI storage {}: {}", self.base.storage_name(), e);
                runtime.reset();
                Err(e)
            }
        }
    }

    async fn unmount(&self) -> StorageResult<()> {
        let mut runtime = self.runtime.write().await;
        if !runtime.is_connected() {
            return Ok(());
        }
        let conf = self.require_conf()?;

        runtime.enter(ConnectionState::LoggingOut);
        info!("Unmounting iSCSI storage {}", self.base.storage_name());
        if let Err(e) = self.logout(conf).await {
            error!("Logout from {} failed: {}", conf.iqn, e);
        }
        if let Err(e) = self.delete_node(conf).await {
            warn!("Failed to remove node record for {}: {}", conf.iqn, e);
        }

        runtime.reset();
        Ok(())
    }

    async fn detach(&self) -> StorageResult<()> {
        self.unmount().await
    }

    async fn accessible(&self) -> StorageResult<()> {
        if !self.is_connected().await {
            self.mount().await?;
        }

        let device = self
            .device_path()
            .await
            .ok_or_else(|| StorageError::DeviceNotFound {
                message: "no device path available".to_string(),
            })?;

        tokio::fs::metadata(&device)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::DeviceNotFound {
                message: format!("device {} not accessible: {}", device.display(), e),
            })
    }

    async fn is_connected(&self) -> bool {
        self.runtime.read().await.is_connected()
    }

    fn capacity_mb(&self) -> Option<u64> {
        None
    }

    fn free_size_mb(&self) -> Option<u64> {
        None
    }

    async fn create_disk(&self, disk_id: &str) -> Arc<dyn Disk> {
        let disk: Arc<dyn Disk> = Arc::new(LocalDisk::new(disk_id, self.device_source()));
        self.base.add_disk(disk.clone()).await;
        disk
    }

    async fn remove_disk(&self, disk_id: &str) {
        if !self.base.remove_disk(disk_id).await {
            debug!("Disk {} not tracked by {}", disk_id, self.base.storage_name());
        }
    }

    async fn get_disk_by_id(&self, disk_id: &str) -> StorageResult<Arc<dyn Disk>> {
        let disk = match self.base.find_disk(disk_id).await {
            Some(disk) => disk,
            None => self.create_disk(disk_id).await,
        };

        disk.probe().await.map_err(|e| StorageError::DeviceNotFound {
            message: format!("disk {} not found: {}", disk_id, e),
        })?;
        Ok(disk)
    }

    fn disks_path(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn snapshot_dir(&self) -> Option<PathBuf> {
        None
    }

    fn snapshot_path(&self, _disk_id: &str, _snapshot_id: &str) -> Option<PathBuf> {
        None
    }

    fn backup_dir(&self) -> Option<PathBuf> {
        None
    }

    fn fuse_tmp_path(&self) -> Option<PathBuf> {
        None
    }

    fn fuse_mount_path(&self) -> Option<PathBuf> {
        None
    }

    fn imgsave_backup_path(&self) -> Option<PathBuf> {
        None
    }

    fn clone_target_disk_path(&self, _target_disk_id: &str) -> Option<PathBuf> {
        None
    }

    async fn is_snapshot_exist(&self, _disk_id: &str, _snapshot_id: &str) -> StorageResult<bool> {
        Err(StorageError::unsupported("snapshot existence check"))
    }

    async fn create_snapshot_from_url(&self, _url: &str, _disk_id: &str, _snapshot_path: &str) -> StorageResult<()> {
        Err(StorageError::unsupported("create snapshot from url"))
    }

    async fn delete_snapshot(&self, _params: &Value) -> StorageResult<Value> {
        Err(StorageError::unsupported("delete snapshot"))
    }

    async fn delete_snapshots(&self, _params: &Value) -> StorageResult<Value> {
        Err(StorageError::unsupported("delete snapshots"))
    }

    async fn create_disk_from_snapshot(&self, _disk: &dyn Disk, _params: &Value) -> StorageResult<Value> {
        Err(StorageError::unsupported("create disk from snapshot"))
    }

    async fn create_disk_from_existing_path(&self, _disk: &dyn Disk, _params: &Value) -> StorageResult<()> {
        Err(StorageError::unsupported("create disk from existing path"))
    }

    async fn create_disk_from_backup(&self, _disk: &dyn Disk, _params: &Value) -> StorageResult<()> {
        Err(StorageError::unsupported("create disk from backup"))
    }

    async fn storage_backup(&self, _params: &Value) -> StorageResult<Value> {
        Err(StorageError::unsupported("storage backup"))
    }

    async fn storage_backup_recovery(&self, _params: &Value) -> StorageResult<Value> {
        Err(StorageError::unsupported("storage backup recovery"))
    }

    async fn save_to_image_service(&self, _params: &Value) -> StorageResult<Value> {
        Err(StorageError::unsupported("save to image service"))
    }

    async fn delete_diskfile(&self, _disk_path: &str, _skip_recycle: bool) -> StorageResult<()> {
        Err(StorageError::unsupported("delete disk file"))
    }

    async fn clone_disk_from_storage(
        &self,
        _src_disk: &dyn Disk,
        _target_disk_id: &str,
        _full_copy: bool,
    ) -> StorageResult<Value> {
        Err(StorageError::unsupported("clone disk from storage"))
    }

    async fn disk_migrate(&self, _params: &Value) -> StorageResult<Value> {
        Err(StorageError::unsupported("disk migrate"))
    }

    async fn destination_prepare_migrate(&self, _params: &Value) -> StorageResult<()> {
        Err(StorageError::unsupported("destination prepare migrate"))
    }

    async fn clean_recycle_diskfiles(&self) {
        info!(
            "Recycle bin cleanup is a no-op for iSCSI storage {}",
            self.base.storage_name()
        );
    }

    fn sync_info(&self) -> StorageSyncInfo {
        StorageSyncInfo {
            name: self.base.storage_name().to_string(),
            status: StorageStatus::Online,
            zone: self.base.zone_id().map(str::to_string),
        }
    }
}
