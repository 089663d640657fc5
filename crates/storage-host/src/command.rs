//! External tool execution with a bounded runtime

use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use cloud_storage_core::{CommandError, StorageResult};

/// Captured result of one tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: &str) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    /// stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.stdout.contains(needle) || self.stderr.contains(needle)
    }
}

#[derive(Debug, Clone)]
pub struct SystemCommand {
    timeout: Duration,
}

impl SystemCommand {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `program` with `args`. `operation` is what gets logged; callers
    /// keep secrets out of it. A non-zero exit is not an error here.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        operation: &str,
    ) -> StorageResult<CommandOutput> {
        let start_time = Instant::now();
        debug!("Executing {}", operation);

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        let result = timeout(self.timeout, cmd.output()).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let success = output.status.success();
                let exit_code = output.status.code();

                if success {
                    debug!("{} completed successfully in {}ms", operation, duration_ms);
                } else {
                    warn!(
                        "{} failed with exit code {:?}: {}",
                        operation,
                        exit_code,
                        stderr.trim()
                    );
                }

                Ok(CommandOutput {
                    success,
                    exit_code,
                    stdout,
                    stderr,
                    duration_ms,
                })
            }
            Ok(Err(e)) => {
                error!("{} failed to execute: {}", operation, e);
                Err(CommandError::Spawn {
                    command: operation.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
            Err(_) => {
                error!("{} timed out after {:?}", operation, self.timeout);
                Err(CommandError::TimedOut {
                    command: operation.to_string(),
                    timeout: self.timeout,
                }
                .into())
            }
        }
    }
}
