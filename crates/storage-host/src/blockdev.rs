//! Block device size query via `blockdev --getsize64`

use std::path::Path;
use std::time::Duration;

use cloud_storage_core::{CommandError, StorageError, StorageResult};

use crate::command::SystemCommand;

const BYTES_PER_MB: u64 = 1024 * 1024;

pub struct BlockDevice {
    path: String,
    executor: SystemCommand,
}

impl BlockDevice {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            executor: SystemCommand::new(timeout),
        }
    }

    /// Size of `device` in MiB, rounded down.
    pub async fn size_mb(&self, device: &Path) -> StorageResult<u64> {
        let operation = format!("{} --getsize64 {}", self.path, device.display());
        let args = vec!["--getsize64".to_string(), device.display().to_string()];
        let output = self.executor.run(&self.path, &args, &operation).await?;

        if !output.success {
            return Err(CommandError::Failed {
                command: operation,
                exit_code: output.exit_code,
                output: output.combined(),
            }
            .into());
        }
        parse_size_bytes(&output.stdout).map(bytes_to_mb)
    }
}

pub fn parse_size_bytes(output: &str) -> StorageResult<u64> {
    let trimmed = output.trim();
    trimmed.parse::<u64>().map_err(|e| StorageError::BadRequest {
        message: format!("parse device size {:?}: {}", trimmed, e),
    })
}

pub fn bytes_to_mb(bytes: u64) -> u64 {
    bytes / BYTES_PER_MB
}
