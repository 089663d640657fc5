pub mod error;
pub mod input;
pub mod iscsi;
pub mod storage;

pub use error::{SharedResult, SharedTypeError};
pub use input::{StorageCreateInput, StorageUpdateInput, UNSET_LUN_ID};
pub use iscsi::{
    split_host_port, ChapCredentials, ConnectionIdentity, IscsiStorageConf, MAX_IQN_LEN,
    MAX_LUN_ID,
};
pub use storage::{StorageCacheRecord, StorageRecord, StorageStatus, StorageType};
