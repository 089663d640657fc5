//! Device path resolution
//!
//! udev publishes iSCSI LUNs under `/dev/disk/by-path` with names like
//! `ip-192.168.1.100:3260-iscsi-iqn.2023-01.com.example:target01-lun-0`.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use cloud_storage_core::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct DevicePathResolver {
    by_path_dir: PathBuf,
}

impl DevicePathResolver {
    pub fn new(by_path_dir: impl Into<PathBuf>) -> Self {
        Self {
            by_path_dir: by_path_dir.into(),
        }
    }

    pub fn by_path_dir(&self) -> &Path {
        &self.by_path_dir
    }

    /// Resolve the block device for (portal host, iqn, lun) once. Retrying
    /// is up to the caller.
    pub async fn resolve(&self, portal_host: &str, iqn: &str, lun_id: u8) -> StorageResult<PathBuf> {
        let pattern = entry_pattern(portal_host, iqn, lun_id)?;

        let listing_error = |e: std::io::Error| StorageError::DeviceNotFound {
            message: format!("read {}: {}", self.by_path_dir.display(), e),
        };
        let mut dir = tokio::fs::read_dir(&self.by_path_dir)
            .await
            .map_err(listing_error)?;

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(listing_error)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        let name = names
            .into_iter()
            .find(|name| pattern.is_match(name))
            .ok_or_else(|| StorageError::DeviceNotFound {
                message: format!("device not found for target {} lun {}", iqn, lun_id),
            })?;

        let link = self.by_path_dir.join(&name);
        match tokio::fs::canonicalize(&link).await {
            Ok(real) => {
                debug!("Resolved {} to {}", link.display(), real.display());
                Ok(real)
            }
            Err(e) => {
                warn!("Failed to resolve symlink {}: {}", link.display(), e);
                Err(StorageError::DeviceNotFound {
                    message: format!("resolve {}: {}", link.display(), e),
                })
            }
        }
    }
}

/// Anchored so that lun 1 never matches a `-lun-10` entry.
fn entry_pattern(portal_host: &str, iqn: &str, lun_id: u8) -> StorageResult<Regex> {
    let host = if portal_host.contains(':') && !portal_host.starts_with('[') {
        format!("[{}]", portal_host)
    } else {
        portal_host.to_string()
    };
    let pattern = format!(
        "^ip-{}.*-iscsi-{}-lun-{}$",
        regex::escape(&host),
        regex::escape(iqn),
        lun_id
    );
    Regex::new(&pattern).map_err(|e| StorageError::DeviceNotFound {
        message: format!("compile device path pattern: {}", e),
    })
}
