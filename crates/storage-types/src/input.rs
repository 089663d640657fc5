//! Request payloads accepted by the storage drivers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::StorageType;

/// Sentinel for "LUN not given"; coerced to 0 during validation.
pub const UNSET_LUN_ID: i64 = -1;

fn default_lun_id() -> i64 {
    UNSET_LUN_ID
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageCreateInput {
    pub name: String,
    pub storage_type: StorageType,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub iscsi_target: String,
    #[serde(default)]
    pub iscsi_iqn: String,
    #[serde(default)]
    pub iscsi_portal: String,
    #[serde(default)]
    pub iscsi_username: String,
    #[serde(default)]
    pub iscsi_password: String,
    #[serde(default = "default_lun_id")]
    pub iscsi_lun_id: i64,
    /// Filled in by the driver once the request validates.
    #[serde(default)]
    pub storage_conf: Value,
}

impl StorageCreateInput {
    pub fn iscsi(name: &str, target: &str, iqn: &str, portal: &str) -> Self {
        Self {
            name: name.to_string(),
            storage_type: StorageType::Iscsi,
            zone_id: None,
            iscsi_target: target.to_string(),
            iscsi_iqn: iqn.to_string(),
            iscsi_portal: portal.to_string(),
            iscsi_username: String::new(),
            iscsi_password: String::new(),
            iscsi_lun_id: UNSET_LUN_ID,
            storage_conf: Value::Null,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.iscsi_username = username.to_string();
        self.iscsi_password = password.to_string();
        self
    }

    pub fn with_lun_id(mut self, lun_id: i64) -> Self {
        self.iscsi_lun_id = lun_id;
        self
    }
}

impl fmt::Debug for StorageCreateInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCreateInput")
            .field("name", &self.name)
            .field("storage_type", &self.storage_type)
            .field("zone_id", &self.zone_id)
            .field("iscsi_target", &self.iscsi_target)
            .field("iscsi_iqn", &self.iscsi_iqn)
            .field("iscsi_portal", &self.iscsi_portal)
            .field("iscsi_username", &self.iscsi_username)
            .field("iscsi_password", &mask(&self.iscsi_password))
            .field("iscsi_lun_id", &self.iscsi_lun_id)
            .finish()
    }
}

/// Update request. `storage_conf` carries the record's current
/// configuration blob; drivers write changed fields back into it and raise
/// `update_storage_conf` so the persistence layer stores the new blob.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct StorageUpdateInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub iscsi_username: String,
    #[serde(default)]
    pub iscsi_password: String,
    #[serde(default)]
    pub storage_conf: Map<String, Value>,
    #[serde(default)]
    pub update_storage_conf: bool,
}

impl StorageUpdateInput {
    pub fn credentials(username: &str, password: &str) -> Self {
        Self {
            iscsi_username: username.to_string(),
            iscsi_password: password.to_string(),
            ..Default::default()
        }
    }

    /// Seed the update with an existing configuration blob.
    pub fn with_storage_conf(mut self, conf: &Value) -> Self {
        if let Some(map) = conf.as_object() {
            self.storage_conf = map.clone();
        }
        self
    }

    pub fn conf_str(&self, key: &str) -> &str {
        self.storage_conf
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

impl fmt::Debug for StorageUpdateInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageUpdateInput")
            .field("name", &self.name)
            .field("iscsi_username", &self.iscsi_username)
            .field("iscsi_password", &mask(&self.iscsi_password))
            .field("update_storage_conf", &self.update_storage_conf)
            .finish_non_exhaustive()
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}
