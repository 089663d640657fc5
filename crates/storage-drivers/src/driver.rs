//! Control-plane driver contract

use async_trait::async_trait;
use log::debug;

use cloud_storage_core::{StorageError, StorageResult};
use cloud_storage_types::{StorageCreateInput, StorageRecord, StorageType, StorageUpdateInput};

/// Per-backend hooks run by the control plane around storage persistence.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    fn storage_type(&self) -> StorageType;

    /// Validate and normalize a creation request before any record exists.
    async fn validate_create_data(&self, input: &mut StorageCreateInput) -> StorageResult<()>;

    /// Runs once after the record is persisted. Failures are logged, never
    /// raised, since the record already exists.
    async fn post_create(&self, storage: &mut StorageRecord);

    async fn validate_update_data(&self, input: &mut StorageUpdateInput) -> StorageResult<()>;
}

/// Checks shared by every backend. Concrete drivers hold one and forward
/// to it explicitly.
#[derive(Debug, Clone)]
pub struct BaseStorageDriver {
    storage_type: StorageType,
}

impl BaseStorageDriver {
    pub fn new(storage_type: StorageType) -> Self {
        Self { storage_type }
    }

    pub fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    pub fn validate_create_data(&self, input: &mut StorageCreateInput) -> StorageResult<()> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(StorageError::missing("name"));
        }
        input.name = name.to_string();

        if input.storage_type != self.storage_type {
            return Err(StorageError::BadRequest {
                message: format!(
                    "storage type {} does not match driver {}",
                    input.storage_type, self.storage_type
                ),
            });
        }
        Ok(())
    }

    pub fn validate_update_data(&self, input: &mut StorageUpdateInput) -> StorageResult<()> {
        if let Some(name) = input.name.as_mut() {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(StorageError::missing("name"));
            }
            *name = trimmed.to_string();
        }
        debug!("Base update validation passed for {} storage", self.storage_type);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_name() {
        let base = BaseStorageDriver::new(StorageType::Iscsi);
        let mut input = cloud_storage_types::StorageCreateInput::iscsi(
            "  ",
            "10.0.0.1",
            "iqn.2024-12.org.test:lun",
            "10.0.0.1:3260",
        );
        assert!(matches!(
            base.validate_create_data(&mut input),
            Err(StorageError::MissingParameter { .. })
        ));

        input.name = " pool ".to_string();
        base.validate_create_data(&mut input).unwrap();
        assert_eq!(input.name, "pool");
    }

    #[test]
    fn test_create_rejects_foreign_type() {
        let base = BaseStorageDriver::new(StorageType::Local);
        let mut input = cloud_storage_types::StorageCreateInput::iscsi(
            "pool",
            "10.0.0.1",
            "iqn.2024-12.org.test:lun",
            "10.0.0.1:3260",
        );
        assert!(base.validate_create_data(&mut input).is_err());
    }

    #[test]
    fn test_update_trims_name() {
        let base = BaseStorageDriver::new(StorageType::Iscsi);
        let mut input = StorageUpdateInput {
            name: Some(" renamed ".to_string()),
            ..Default::default()
        };
        base.validate_update_data(&mut input).unwrap();
        assert_eq!(input.name.as_deref(), Some("renamed"));

        input.name = Some(String::new());
        assert!(base.validate_update_data(&mut input).is_err());
    }
}
