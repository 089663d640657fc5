//! Core contracts for iSCSI-backed storage pools
//!
//! Error taxonomy shared by the control plane and the host agent, and the
//! persistence collaborator the drivers talk to.

pub mod error;
pub mod memory;
pub mod repository;

pub use error::{CommandError, StorageError};
pub use memory::InMemoryStorageRepository;
pub use repository::{StorageQuery, StorageRepository};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
