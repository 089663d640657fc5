//! Image-cache reconciliation for freshly created iSCSI storages
//!
//! Storages behind the same target, iqn and portal share one cache record
//! whatever their LUN. The first of them provisions it.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};

use cloud_storage_core::{StorageError, StorageQuery, StorageRepository, StorageResult};
use cloud_storage_types::{StorageCacheRecord, StorageRecord, StorageStatus, StorageType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The record already referenced a cache; only the status changed.
    AlreadyAttached,
    /// Adopted the cache of a sibling storage.
    Shared { cache_id: String },
    /// Provisioned a new cache record.
    Provisioned { cache_id: String },
}

impl ReconcileOutcome {
    pub fn cache_id(&self) -> Option<&str> {
        match self {
            ReconcileOutcome::AlreadyAttached => None,
            ReconcileOutcome::Shared { cache_id } | ReconcileOutcome::Provisioned { cache_id } => {
                Some(cache_id)
            }
        }
    }
}

pub fn cache_name(storage_id: &str) -> String {
    format!("iscsi-cache-{}", storage_id)
}

pub struct CacheReconciler {
    repository: Arc<dyn StorageRepository>,
    default_image_cache_dir: PathBuf,
}

impl CacheReconciler {
    pub fn new(repository: Arc<dyn StorageRepository>, default_image_cache_dir: PathBuf) -> Self {
        Self {
            repository,
            default_image_cache_dir,
        }
    }

    /// Attach a cache to `storage` and mark it online. `storage` is only
    /// modified once the repository accepted the change.
    pub async fn reconcile(&self, storage: &mut StorageRecord) -> StorageResult<ReconcileOutcome> {
        let mut updated = storage.clone();

        let outcome = if storage.has_cache() {
            ReconcileOutcome::AlreadyAttached
        } else if let Some(cache_id) = self.find_shared_cache(storage).await? {
            updated.storagecache_id = Some(cache_id.clone());
            ReconcileOutcome::Shared { cache_id }
        } else {
            let cache = self.provision_cache(storage).await?;
            updated.storagecache_id = Some(cache.id.clone());
            ReconcileOutcome::Provisioned { cache_id: cache.id }
        };

        updated.status = StorageStatus::Online;
        self.repository.update_storage(&updated).await?;
        *storage = updated;

        match &outcome {
            ReconcileOutcome::AlreadyAttached => {
                debug!("Storage {} already has a cache, marked online", storage.name)
            }
            ReconcileOutcome::Shared { cache_id } => {
                info!("Storage {} shares storage cache {}", storage.name, cache_id)
            }
            ReconcileOutcome::Provisioned { cache_id } => info!(
                "Successfully created storage cache {} for iSCSI storage {}",
                cache_id, storage.name
            ),
        }
        Ok(outcome)
    }

    async fn find_shared_cache(&self, storage: &StorageRecord) -> StorageResult<Option<String>> {
        let identity = storage
            .connection_identity()
            .ok_or_else(|| StorageError::BadRequest {
                message: format!("storage {} is not an iSCSI storage", storage.id),
            })?;

        let query = StorageQuery::storage_type(StorageType::Iscsi)
            .target(&identity.target)
            .iqn(&identity.iqn)
            .portal(&identity.portal)
            .excluding(&storage.id);

        let peers = self.repository.find_storages(&query).await?;
        Ok(peers
            .into_iter()
            .find(|peer| peer.has_cache())
            .and_then(|peer| peer.storagecache_id))
    }

    async fn provision_cache(&self, storage: &StorageRecord) -> StorageResult<StorageCacheRecord> {
        let cache = StorageCacheRecord {
            id: String::new(),
            name: cache_name(&storage.id),
            path: self.default_image_cache_dir.clone(),
            external_id: storage.id.clone(),
            created_at: Utc::now(),
        };
        self.repository.insert_cache(cache).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloud_storage_core::InMemoryStorageRepository;
    use serde_json::json;

    fn record(id: &str, portal: &str, lun: u64) -> StorageRecord {
        StorageRecord::new(
            id.to_string(),
            format!("pool-{}", id),
            StorageType::Iscsi,
            json!({
                "target": "192.168.1.100",
                "iqn": "iqn.2023-01.com.example:storage.target01",
                "portal": portal,
                "lun_id": lun
            }),
        )
    }

    #[test]
    fn test_cache_name_is_derived_from_storage_id() {
        assert_eq!(cache_name("abc"), "iscsi-cache-abc");
    }

    #[tokio::test]
    async fn test_existing_cache_only_flips_status() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let mut storage = record("a", "192.168.1.100:3260", 0);
        storage.storagecache_id = Some("cache-1".to_string());
        let mut storage = repo.insert_storage(storage).await.unwrap();

        let reconciler = CacheReconciler::new(repo.clone(), PathBuf::from("/cache"));
        let outcome = reconciler.reconcile(&mut storage).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::AlreadyAttached);
        assert_eq!(storage.status, StorageStatus::Online);
        assert_eq!(repo.cache_count().await, 0);
    }

    #[tokio::test]
    async fn test_provisioned_cache_fields() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        let mut storage = repo
            .insert_storage(record("a", "192.168.1.100:3260", 0))
            .await
            .unwrap();

        let reconciler = CacheReconciler::new(repo.clone(), PathBuf::from("/cache"));
        let outcome = reconciler.reconcile(&mut storage).await.unwrap();

        let cache_id = outcome.cache_id().unwrap().to_string();
        let cache = repo.get_cache(&cache_id).await.unwrap();
        assert_eq!(cache.name, "iscsi-cache-a");
        assert_eq!(cache.path, PathBuf::from("/cache"));
        assert_eq!(cache.external_id, "a");

        let persisted = repo.get_storage("a").await.unwrap();
        assert_eq!(persisted.storagecache_id.as_deref(), Some(cache_id.as_str()));
        assert_eq!(persisted.status, StorageStatus::Online);
    }

    #[tokio::test]
    async fn test_peer_without_cache_is_not_shared() {
        let repo = Arc::new(InMemoryStorageRepository::new());
        repo.insert_storage(record("a", "192.168.1.100:3260", 0))
            .await
            .unwrap();
        let mut storage = repo
            .insert_storage(record("b", "192.168.1.100:3260", 1))
            .await
            .unwrap();

        let reconciler = CacheReconciler::new(repo.clone(), PathBuf::from("/cache"));
        let outcome = reconciler.reconcile(&mut storage).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Provisioned { .. }));
    }
}
