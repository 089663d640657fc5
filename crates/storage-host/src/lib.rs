//! Host-side iSCSI storage
//!
//! Attaches storage records to this host through the system initiator,
//! resolves the resulting block device and exposes it to the generic host
//! storage contract.

pub mod agent;
pub mod blockdev;
pub mod command;
pub mod device;
pub mod factory;
pub mod initiator;
pub mod iscsi;
pub mod state;
pub mod storage;

pub use agent::load_storage;
pub use blockdev::BlockDevice;
pub use command::{CommandOutput, SystemCommand};
pub use device::DevicePathResolver;
pub use factory::{iscsi_factory, HostStorageFactory, StorageFactoryRegistry, StorageFactoryRegistryBuilder};
pub use initiator::{Initiator, InitiatorCommand, IscsiAdm, SessionEntry};
pub use iscsi::IscsiStorage;
pub use state::{ConnectionState, DeviceWaitPolicy, RuntimeState};
pub use storage::{BaseStorage, BlockDeviceSource, Disk, HostStorage, LocalDisk, StorageSyncInfo};

#[cfg(test)]
mod tests;
