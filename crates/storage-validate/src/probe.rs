//! Bounded reachability probe against an iSCSI portal

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;

use cloud_storage_types::split_host_port;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to parse portal address: {0}")]
    InvalidPortal(String),

    #[error("invalid port in portal: {0}")]
    InvalidPort(String),

    #[error("failed to connect to iSCSI portal {portal}: {source}")]
    Connect {
        portal: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to iSCSI portal {portal}: timed out after {timeout:?}")]
    TimedOut { portal: String, timeout: Duration },
}

/// Transport-level check that a portal accepts TCP connections. No iSCSI
/// handshake happens, so credentials are never exercised here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, portal: &str) -> Result<(), ProbeError>;
}

pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn probe(&self, portal: &str) -> Result<(), ProbeError> {
        let (host, port) = split_host_port(portal).map_err(ProbeError::InvalidPortal)?;
        let port: u16 = port
            .parse()
            .map_err(|e: std::num::ParseIntError| ProbeError::InvalidPort(e.to_string()))?;

        let connect = TcpStream::connect((host, port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(stream)) => {
                drop(stream);
                log::info!("Successfully connected to iSCSI portal {}", portal);
                Ok(())
            }
            Ok(Err(source)) => Err(ProbeError::Connect {
                portal: portal.to_string(),
                source,
            }),
            Err(_) => Err(ProbeError::TimedOut {
                portal: portal.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}
