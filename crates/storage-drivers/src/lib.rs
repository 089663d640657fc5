//! Control-plane storage drivers
//!
//! Validation hooks, post-create cache reconciliation and the serialized
//! creation flow for iSCSI-backed storage pools.

pub mod driver;
pub mod iscsi;
pub mod reconcile;
pub mod registry;
pub mod service;

pub use driver::{BaseStorageDriver, StorageDriver};
pub use iscsi::IscsiStorageDriver;
pub use reconcile::{cache_name, CacheReconciler, ReconcileOutcome};
pub use registry::{DriverRegistry, DriverRegistryBuilder};
pub use service::StorageService;
