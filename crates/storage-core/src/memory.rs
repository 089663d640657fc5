//! In-process storage repository
//!
//! Keeps records in memory behind a single lock. Inserting an iSCSI record
//! whose connection identity is already registered fails, so the identity
//! stays unique even when two creations race past the validator's scan.

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;
use uuid::Uuid;

use cloud_storage_types::{StorageCacheRecord, StorageRecord};

use crate::repository::{StorageQuery, StorageRepository};
use crate::{StorageError, StorageResult};

#[derive(Default)]
struct Tables {
    storages: HashMap<String, StorageRecord>,
    caches: HashMap<String, StorageCacheRecord>,
}

#[derive(Default)]
pub struct InMemoryStorageRepository {
    tables: RwLock<Tables>,
}

impl InMemoryStorageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn storage_count(&self) -> usize {
        self.tables.read().await.storages.len()
    }

    pub async fn cache_count(&self) -> usize {
        self.tables.read().await.caches.len()
    }
}

#[async_trait]
impl StorageRepository for InMemoryStorageRepository {
    async fn get_storage(&self, id: &str) -> StorageResult<StorageRecord> {
        self.tables
            .read()
            .await
            .storages
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::persistence(format!("storage {} not found", id)))
    }

    async fn find_storages(&self, query: &StorageQuery) -> StorageResult<Vec<StorageRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<StorageRecord> = tables
            .storages
            .values()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn insert_storage(&self, mut record: StorageRecord) -> StorageResult<StorageRecord> {
        let mut tables = self.tables.write().await;

        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        if tables.storages.contains_key(&record.id) {
            return Err(StorageError::DuplicateResource {
                message: format!("storage {} already exists", record.id),
            });
        }
        if let Some(identity) = record.connection_identity() {
            let taken = tables
                .storages
                .values()
                .any(|existing| existing.connection_identity().as_ref() == Some(&identity));
            if taken {
                return Err(StorageError::DuplicateResource {
                    message: format!("iSCSI storage with {} already exists", identity),
                });
            }
        }

        debug!("Inserted storage record {}", record.id);
        tables.storages.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_storage(&self, record: &StorageRecord) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        match tables.storages.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::persistence(format!(
                "storage {} not found",
                record.id
            ))),
        }
    }

    async fn insert_cache(&self, mut cache: StorageCacheRecord) -> StorageResult<StorageCacheRecord> {
        let mut tables = self.tables.write().await;
        if cache.id.is_empty() {
            cache.id = Uuid::new_v4().to_string();
        }
        if tables.caches.contains_key(&cache.id) {
            return Err(StorageError::DuplicateResource {
                message: format!("storage cache {} already exists", cache.id),
            });
        }
        debug!("Inserted storage cache record {}", cache.id);
        tables.caches.insert(cache.id.clone(), cache.clone());
        Ok(cache)
    }

    async fn get_cache(&self, id: &str) -> StorageResult<StorageCacheRecord> {
        self.tables
            .read()
            .await
            .caches
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::persistence(format!("storage cache {} not found", id)))
    }
}
