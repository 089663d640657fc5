use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use cloud_storage_config::AgentConfig;

/// Attach lifecycle of one storage on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Discovering,
    LoggingIn,
    WaitingForDevice,
    Connected,
    LoggingOut,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Discovering => "discovering",
            ConnectionState::LoggingIn => "logging-in",
            ConnectionState::WaitingForDevice => "waiting-for-device",
            ConnectionState::Connected => "connected",
            ConnectionState::LoggingOut => "logging-out",
        };
        f.write_str(name)
    }
}

/// Process-local runtime state. `device_path` is set exactly when the
/// state is `Connected`.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    state: ConnectionState,
    device_path: Option<PathBuf>,
}

impl RuntimeState {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn device_path(&self) -> Option<&PathBuf> {
        self.device_path.as_ref()
    }

    pub(crate) fn enter(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub(crate) fn connect(&mut self, device_path: PathBuf) {
        self.device_path = Some(device_path);
        self.state = ConnectionState::Connected;
    }

    pub(crate) fn reset(&mut self) {
        self.device_path = None;
        self.state = ConnectionState::Disconnected;
    }
}

/// How long and how often to poll for the block device after login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceWaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for DeviceWaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::from_secs(1),
        }
    }
}

impl From<&AgentConfig> for DeviceWaitPolicy {
    fn from(config: &AgentConfig) -> Self {
        Self {
            timeout: config.device_wait_timeout(),
            interval: config.device_poll_interval(),
        }
    }
}
