//! iSCSI initiator tool invocation
//!
//! Verbs are modelled as data so the connection state machine can be
//! driven against a scripted initiator in tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use cloud_storage_core::StorageResult;
use cloud_storage_types::ChapCredentials;

use crate::command::{CommandOutput, SystemCommand};

pub const AUTH_METHOD_PARAM: &str = "node.session.auth.authmethod";
pub const AUTH_USERNAME_PARAM: &str = "node.session.auth.username";
pub const AUTH_PASSWORD_PARAM: &str = "node.session.auth.password";

const REDACTED: &str = "******";

#[derive(Clone, PartialEq, Eq)]
pub enum InitiatorCommand {
    /// Send-targets discovery against a portal.
    Discovery {
        portal: String,
        credentials: Option<ChapCredentials>,
    },
    Login {
        iqn: String,
        portal: String,
    },
    Logout {
        iqn: String,
        portal: String,
    },
    SetNodeParam {
        iqn: String,
        portal: String,
        name: String,
        value: String,
    },
    DeleteNode {
        iqn: String,
        portal: String,
    },
    ListSessions,
}

impl InitiatorCommand {
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<&str> = Vec::new();
        match self {
            InitiatorCommand::Discovery {
                portal,
                credentials,
            } => {
                args.extend(["-m", "discovery", "-t", "sendtargets", "-p", portal.as_str()]);
                if let Some(creds) = credentials {
                    args.extend([
                        "--username",
                        creds.username.as_str(),
                        "--password",
                        creds.password.as_str(),
                    ]);
                }
            }
            InitiatorCommand::Login { iqn, portal } => {
                args.extend(["-m", "node", "-T", iqn.as_str(), "-p", portal.as_str(), "--login"]);
            }
            InitiatorCommand::Logout { iqn, portal } => {
                args.extend(["-m", "node", "-T", iqn.as_str(), "-p", portal.as_str(), "--logout"]);
            }
            InitiatorCommand::SetNodeParam {
                iqn,
                portal,
                name,
                value,
            } => {
                args.extend([
                    "-m",
                    "node",
                    "-T",
                    iqn.as_str(),
                    "-p",
                    portal.as_str(),
                    "-o",
                    "update",
                    "-n",
                    name.as_str(),
                    "-v",
                    value.as_str(),
                ]);
            }
            InitiatorCommand::DeleteNode { iqn, portal } => {
                args.extend(["-m", "node", "-T", iqn.as_str(), "-p", portal.as_str(), "-o", "delete"]);
            }
            InitiatorCommand::ListSessions => {
                args.extend(["-m", "session"]);
            }
        }
        args.into_iter().map(String::from).collect()
    }

    pub fn verb(&self) -> &'static str {
        match self {
            InitiatorCommand::Discovery { .. } => "discovery",
            InitiatorCommand::Login { .. } => "login",
            InitiatorCommand::Logout { .. } => "logout",
            InitiatorCommand::SetNodeParam { .. } => "set node parameter",
            InitiatorCommand::DeleteNode { .. } => "delete node",
            InitiatorCommand::ListSessions => "list sessions",
        }
    }

    /// Arguments with secrets masked, for logs and error messages.
    fn redacted_args(&self) -> Vec<String> {
        let mut args = self.args();
        let mut mask_next = false;
        let secret_param = matches!(
            self,
            InitiatorCommand::SetNodeParam { name, .. } if name == AUTH_PASSWORD_PARAM
        );
        for arg in args.iter_mut() {
            if mask_next {
                *arg = REDACTED.to_string();
                mask_next = false;
                continue;
            }
            mask_next = arg.as_str() == "--password" || (secret_param && arg.as_str() == "-v");
        }
        args
    }
}

impl fmt::Debug for InitiatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iscsiadm {}", self.redacted_args().join(" "))
    }
}

impl fmt::Display for InitiatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Runs initiator verbs. Non-zero exits come back as output with
/// `success == false`; only a tool that cannot run at all is an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Initiator: Send + Sync {
    async fn run(&self, command: &InitiatorCommand) -> StorageResult<CommandOutput>;
}

/// `iscsiadm` from open-iscsi
pub struct IscsiAdm {
    path: String,
    executor: SystemCommand,
}

impl IscsiAdm {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            executor: SystemCommand::new(timeout),
        }
    }
}

#[async_trait]
impl Initiator for IscsiAdm {
    async fn run(&self, command: &InitiatorCommand) -> StorageResult<CommandOutput> {
        self.executor
            .run(&self.path, &command.args(), &command.to_string())
            .await
    }
}

/// One line of `iscsiadm -m session`:
/// `tcp: [1] 192.168.1.100:3260,1 iqn.2023-01.com.example:target01 (non-flash)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub portal: String,
    pub iqn: String,
}

pub fn parse_sessions(output: &str) -> Vec<SessionEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace().skip(2);
            let portal = fields.next()?;
            let iqn = fields.next()?;
            let portal = portal.split(',').next().unwrap_or(portal);
            if !iqn.starts_with("iqn.") && !iqn.starts_with("eui.") && !iqn.starts_with("naa.") {
                return None;
            }
            Some(SessionEntry {
                portal: portal.to_string(),
                iqn: iqn.to_string(),
            })
        })
        .collect()
}
