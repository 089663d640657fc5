use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SharedTypeError;
use crate::iscsi::{ConnectionIdentity, IscsiStorageConf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Iscsi,
    Local,
    Nfs,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Iscsi => "iscsi",
            StorageType::Local => "local",
            StorageType::Nfs => "nfs",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = SharedTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "iscsi" => Ok(StorageType::Iscsi),
            "local" => Ok(StorageType::Local),
            "nfs" => Ok(StorageType::Nfs),
            other => Err(SharedTypeError::Unsupported(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStatus {
    Online,
    Offline,
}

impl Default for StorageStatus {
    fn default() -> Self {
        StorageStatus::Offline
    }
}

impl fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageStatus::Online => f.write_str("online"),
            StorageStatus::Offline => f.write_str("offline"),
        }
    }
}

/// A storage pool as persisted by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRecord {
    pub id: String,
    pub name: String,
    pub storage_type: StorageType,
    #[serde(default)]
    pub status: StorageStatus,
    #[serde(default)]
    pub storagecache_id: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
    /// Backend-specific configuration, opaque to the persistence layer.
    #[serde(default)]
    pub storage_conf: Value,
    pub created_at: DateTime<Utc>,
}

impl StorageRecord {
    pub fn new(id: String, name: String, storage_type: StorageType, storage_conf: Value) -> Self {
        Self {
            id,
            name,
            storage_type,
            status: StorageStatus::Offline,
            storagecache_id: None,
            zone_id: None,
            storage_conf,
            created_at: Utc::now(),
        }
    }

    pub fn has_cache(&self) -> bool {
        self.storagecache_id
            .as_deref()
            .map(|id| !id.is_empty())
            .unwrap_or(false)
    }

    /// String field of the configuration blob, empty when absent.
    pub fn conf_str(&self, key: &str) -> &str {
        self.storage_conf
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn iscsi_conf(&self) -> Result<IscsiStorageConf, SharedTypeError> {
        IscsiStorageConf::from_value(&self.storage_conf)
    }

    /// Connection identity of an iSCSI record, read field by field so that
    /// partially written blobs still compare.
    pub fn connection_identity(&self) -> Option<ConnectionIdentity> {
        if self.storage_type != StorageType::Iscsi {
            return None;
        }
        let lun_id = self
            .storage_conf
            .get("lun_id")
            .and_then(Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(0);
        Some(ConnectionIdentity {
            target: self.conf_str("target").to_string(),
            iqn: self.conf_str("iqn").to_string(),
            portal: self.conf_str("portal").to_string(),
            lun_id,
        })
    }
}

/// Local bookkeeping for artifacts cached on behalf of one or more storages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageCacheRecord {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    /// Id of the storage that provisioned this cache.
    pub external_id: String,
    pub created_at: DateTime<Utc>,
}
