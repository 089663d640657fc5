//! Persistence collaborator for storage and cache records

use async_trait::async_trait;
use cloud_storage_types::{StorageCacheRecord, StorageRecord, StorageType};

use crate::StorageResult;

/// Equality filter over storage records. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageQuery {
    pub storage_type: Option<StorageType>,
    pub target: Option<String>,
    pub iqn: Option<String>,
    pub portal: Option<String>,
    pub lun_id: Option<u8>,
    pub exclude_id: Option<String>,
}

impl StorageQuery {
    pub fn storage_type(storage_type: StorageType) -> Self {
        Self {
            storage_type: Some(storage_type),
            ..Default::default()
        }
    }

    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn iqn(mut self, iqn: &str) -> Self {
        self.iqn = Some(iqn.to_string());
        self
    }

    pub fn portal(mut self, portal: &str) -> Self {
        self.portal = Some(portal.to_string());
        self
    }

    pub fn lun_id(mut self, lun_id: u8) -> Self {
        self.lun_id = Some(lun_id);
        self
    }

    pub fn excluding(mut self, id: &str) -> Self {
        self.exclude_id = Some(id.to_string());
        self
    }

    pub fn matches(&self, record: &StorageRecord) -> bool {
        if let Some(exclude) = &self.exclude_id {
            if &record.id == exclude {
                return false;
            }
        }
        if let Some(storage_type) = self.storage_type {
            if record.storage_type != storage_type {
                return false;
            }
        }
        let field_matches = |want: &Option<String>, key: &str| {
            want.as_deref()
                .map(|v| record.conf_str(key) == v)
                .unwrap_or(true)
        };
        if !field_matches(&self.target, "target")
            || !field_matches(&self.iqn, "iqn")
            || !field_matches(&self.portal, "portal")
        {
            return false;
        }
        if let Some(lun_id) = self.lun_id {
            let stored = record
                .connection_identity()
                .map(|identity| identity.lun_id)
                .unwrap_or(0);
            if stored != lun_id {
                return false;
            }
        }
        true
    }
}

/// Storage and cache persistence, owned by the control plane.
#[async_trait]
pub trait StorageRepository: Send + Sync {
    async fn get_storage(&self, id: &str) -> StorageResult<StorageRecord>;

    async fn find_storages(&self, query: &StorageQuery) -> StorageResult<Vec<StorageRecord>>;

    async fn insert_storage(&self, record: StorageRecord) -> StorageResult<StorageRecord>;

    async fn update_storage(&self, record: &StorageRecord) -> StorageResult<()>;

    async fn insert_cache(&self, cache: StorageCacheRecord) -> StorageResult<StorageCacheRecord>;

    async fn get_cache(&self, id: &str) -> StorageResult<StorageCacheRecord>;
}
