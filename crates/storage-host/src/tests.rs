use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use cloud_storage_config::AgentConfig;
use cloud_storage_core::StorageError;
use cloud_storage_types::{StorageRecord, StorageStatus, StorageType};

use crate::command::CommandOutput;
use crate::factory::{iscsi_factory, StorageFactoryRegistry};
use crate::initiator::{
    InitiatorCommand, MockInitiator, AUTH_METHOD_PARAM, AUTH_PASSWORD_PARAM, AUTH_USERNAME_PARAM,
};
use crate::iscsi::IscsiStorage;
use crate::state::{ConnectionState, DeviceWaitPolicy};
use crate::storage::HostStorage;

const IQN: &str = "iqn.2023-01.com.example:storage.target01";
const PORTAL: &str = "192.168.1.100:3260";

type CommandLog = Arc<Mutex<Vec<InitiatorCommand>>>;

struct Fixture {
    _root: TempDir,
    dev: PathBuf,
    by_path: PathBuf,
    log: CommandLog,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let dev = root.path().join("dev");
        let by_path = root.path().join("by-path");
        fs::create_dir_all(&dev).unwrap();
        fs::create_dir_all(&by_path).unwrap();
        Self {
            _root: root,
            dev,
            by_path,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn config(&self) -> AgentConfig {
        AgentConfig {
            device_by_path_dir: self.by_path.clone(),
            ..Default::default()
        }
    }

    fn verbs(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().iter().map(|c| c.verb()).collect()
    }

    fn commands(&self) -> Vec<InitiatorCommand> {
        self.log.lock().unwrap().clone()
    }

    fn initiator<F>(&self, respond: F) -> MockInitiator
    where
        F: Fn(&InitiatorCommand) -> CommandOutput + Send + 'static,
    {
        let log = self.log.clone();
        let mut initiator = MockInitiator::new();
        initiator.expect_run().returning(move |command| {
            log.lock().unwrap().push(command.clone());
            Ok(respond(command))
        });
        initiator
    }

    /// An initiator whose login makes the LUN show up under by-path.
    fn healthy_initiator(&self) -> MockInitiator {
        let dev = self.dev.clone();
        let by_path = self.by_path.clone();
        self.initiator(move |command| match command {
            InitiatorCommand::Discovery { .. } => CommandOutput::ok(&discovery_output()),
            InitiatorCommand::Login { .. } => {
                publish_device(&dev, &by_path);
                CommandOutput::ok("Login to [iface: default] successful.")
            }
            InitiatorCommand::ListSessions => CommandOutput::failed(21, "iscsiadm: No active sessions."),
            _ => CommandOutput::ok(""),
        })
    }

    fn storage(&self, initiator: MockInitiator, conf: &Value) -> IscsiStorage {
        let mut storage = IscsiStorage::new("/mnt/iscsi", &self.config(), Arc::new(initiator))
            .with_wait_policy(DeviceWaitPolicy {
                timeout: Duration::from_millis(200),
                interval: Duration::from_millis(10),
            });
        storage.set_storage_info("s1", "iscsi-pool", conf).unwrap();
        storage
    }

    fn device(&self) -> PathBuf {
        fs::canonicalize(self.dev.join("sdb")).unwrap()
    }
}

fn conf() -> Value {
    json!({
        "target": "192.168.1.100",
        "iqn": IQN,
        "portal": PORTAL,
        "lun_id": 0,
    })
}

fn chap_conf() -> Value {
    json!({
        "target": "192.168.1.100",
        "iqn": IQN,
        "portal": PORTAL,
        "username": "chapuser",
        "password": "chapsecret",
        "lun_id": 0,
    })
}

fn discovery_output() -> String {
    format!("{},1 {}\n", PORTAL, IQN)
}

fn publish_device(dev: &Path, by_path: &Path) {
    let device = dev.join("sdb");
    let link = by_path.join(format!("ip-{}-iscsi-{}-lun-0", PORTAL, IQN));
    if !link.exists() {
        fs::write(&device, b"").unwrap();
        symlink(&device, &link).unwrap();
    }
}

#[tokio::test]
async fn test_mount_connects_and_records_device() {
    let f = Fixture::new();
    let storage = f.storage(f.healthy_initiator(), &conf());

    storage.mount().await.unwrap();

    assert!(storage.is_connected().await);
    assert_eq!(storage.connection_state().await, ConnectionState::Connected);
    assert_eq!(storage.device_path().await, Some(f.device()));
    assert_eq!(f.verbs(), vec!["discovery", "login"]);
}

#[tokio::test]
async fn test_mount_twice_issues_no_further_commands() {
    let f = Fixture::new();
    let storage = f.storage(f.healthy_initiator(), &conf());

    storage.mount().await.unwrap();
    storage.mount().await.unwrap();

    assert_eq!(f.verbs(), vec!["discovery", "login"]);
}

#[tokio::test]
async fn test_concurrent_mounts_attach_once() {
    let f = Fixture::new();
    let storage = f.storage(f.healthy_initiator(), &conf());

    let (first, second) = tokio::join!(storage.mount(), storage.mount());
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(f.verbs(), vec!["discovery", "login"]);
}

#[tokio::test]
async fn test_chap_parameters_precede_login() {
    let f = Fixture::new();
    let storage = f.storage(f.healthy_initiator(), &chap_conf());

    storage.mount().await.unwrap();

    let commands = f.commands();
    assert!(matches!(
        &commands[0],
        InitiatorCommand::Discovery { credentials: Some(c), .. } if c.username == "chapuser"
    ));
    let params: Vec<(String, String)> = commands
        .iter()
        .filter_map(|c| match c {
            InitiatorCommand::SetNodeParam { name, value, .. } => Some((name.clone(), value.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        params,
        vec![
            (AUTH_METHOD_PARAM.to_string(), "CHAP".to_string()),
            (AUTH_USERNAME_PARAM.to_string(), "chapuser".to_string()),
            (AUTH_PASSWORD_PARAM.to_string(), "chapsecret".to_string()),
        ]
    );
    assert_eq!(f.verbs().last(), Some(&"login"));
}

#[tokio::test]
async fn test_existing_session_counts_as_login() {
    let f = Fixture::new();
    let dev = f.dev.clone();
    let by_path = f.by_path.clone();
    let initiator = f.initiator(move |command| match command {
        InitiatorCommand::Discovery { .. } => CommandOutput::ok(&discovery_output()),
        InitiatorCommand::Login { .. } => {
            publish_device(&dev, &by_path);
            CommandOutput::failed(15, "iscsiadm: session already exists")
        }
        _ => CommandOutput::ok(""),
    });
    let storage = f.storage(initiator, &conf());

    storage.mount().await.unwrap();
    assert!(storage.is_connected().await);
}

#[tokio::test]
async fn test_target_missing_from_discovery() {
    let f = Fixture::new();
    let initiator = f.initiator(|command| match command {
        InitiatorCommand::Discovery { .. } => {
            CommandOutput::ok("192.168.1.100:3260,1 iqn.2023-01.com.example:other\n")
        }
        _ => CommandOutput::ok(""),
    });
    let storage = f.storage(initiator, &conf());

    let err = storage.mount().await.unwrap_err();
    assert!(matches!(err, StorageError::Unreachable { .. }));
    assert!(err.to_string().contains("not found in discovery results"));
    assert_eq!(storage.connection_state().await, ConnectionState::Disconnected);
    assert_eq!(f.verbs(), vec!["discovery"]);
}

#[tokio::test]
async fn test_discovery_tool_failure() {
    let f = Fixture::new();
    let initiator = f.initiator(|_| CommandOutput::failed(4, "iscsiadm: cannot make connection"));
    let storage = f.storage(initiator, &conf());

    let err = storage.mount().await.unwrap_err();
    assert!(err.to_string().contains("cannot make connection"));
    assert!(!storage.is_connected().await);
}

#[tokio::test]
async fn test_login_failure_has_nothing_to_roll_back() {
    let f = Fixture::new();
    let initiator = f.initiator(|command| match command {
        InitiatorCommand::Discovery { .. } => CommandOutput::ok(&discovery_output()),
        InitiatorCommand::Login { .. } => CommandOutput::failed(24, "iscsiadm: Login failed, authorization failure"),
        _ => CommandOutput::ok(""),
    });
    let storage = f.storage(initiator, &conf());

    let err = storage.mount().await.unwrap_err();
    assert!(err.to_string().contains("login failed"));
    assert_eq!(f.verbs(), vec!["discovery", "login"]);
    assert_eq!(storage.connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_device_wait_timeout_rolls_back() {
    let f = Fixture::new();
    let initiator = f.initiator(|command| match command {
        InitiatorCommand::Discovery { .. } => CommandOutput::ok(&discovery_output()),
        _ => CommandOutput::ok(""),
    });
    let storage = f.storage(initiator, &conf());

    let err = storage.mount().await.unwrap_err();
    assert!(matches!(err, StorageError::Timeout { .. }));
    assert_eq!(f.verbs(), vec!["discovery", "login", "logout"]);
    assert_eq!(storage.connection_state().await, ConnectionState::Disconnected);
    assert!(storage.device_path().await.is_none());
}

#[tokio::test]
async fn test_unmount_logs_out_and_forgets_node() {
    let f = Fixture::new();
    let storage = f.storage(f.healthy_initiator(), &conf());
    storage.mount().await.unwrap();

    storage.unmount().await.unwrap();
    assert!(!storage.is_connected().await);
    assert!(storage.device_path().await.is_none());

    storage.detach().await.unwrap();
    assert_eq!(f.verbs(), vec!["discovery", "login", "logout", "delete node"]);
}

#[tokio::test]
async fn test_unmount_without_mount_is_noop() {
    let f = Fixture::new();
    let storage = f.storage(f.initiator(|_| CommandOutput::ok("")), &conf());

    storage.unmount().await.unwrap();
    assert!(f.verbs().is_empty());
}

#[tokio::test]
async fn test_unmount_resets_state_when_cleanup_fails() {
    let f = Fixture::new();
    let dev = f.dev.clone();
    let by_path = f.by_path.clone();
    let initiator = f.initiator(move |command| match command {
        InitiatorCommand::Discovery { .. } => CommandOutput::ok(&discovery_output()),
        InitiatorCommand::Login { .. } => {
            publish_device(&dev, &by_path);
            CommandOutput::ok("")
        }
        InitiatorCommand::Logout { .. } => CommandOutput::failed(8, "iscsiadm: internal error"),
        InitiatorCommand::DeleteNode { .. } => CommandOutput::failed(6, "iscsiadm: database failure"),
        _ => CommandOutput::ok(""),
    });
    let storage = f.storage(initiator, &conf());
    storage.mount().await.unwrap();

    storage.unmount().await.unwrap();
    assert_eq!(storage.connection_state().await, ConnectionState::Disconnected);
    assert!(storage.device_path().await.is_none());
}

#[tokio::test]
async fn test_missing_session_on_logout_is_fine() {
    let f = Fixture::new();
    let dev = f.dev.clone();
    let by_path = f.by_path.clone();
    let initiator = f.initiator(move |command| match command {
        InitiatorCommand::Discovery { .. } => CommandOutput::ok(&discovery_output()),
        InitiatorCommand::Login { .. } => {
            publish_device(&dev, &by_path);
            CommandOutput::ok("")
        }
        InitiatorCommand::Logout { .. } => CommandOutput::failed(21, "iscsiadm: No matching sessions found"),
        InitiatorCommand::DeleteNode { .. } => CommandOutput::failed(21, "iscsiadm: node record not found"),
        _ => CommandOutput::ok(""),
    });
    let storage = f.storage(initiator, &conf());
    storage.mount().await.unwrap();

    assert!(storage.unmount().await.is_ok());
}

#[tokio::test]
async fn test_capacity_is_unknown() {
    let f = Fixture::new();
    let storage = IscsiStorage::new("/mnt/iscsi", &f.config(), Arc::new(MockInitiator::new()));

    assert_eq!(storage.capacity_mb(), None);
    assert_eq!(storage.free_size_mb(), None);
    assert!(!storage.is_connected().await);
}

#[tokio::test]
async fn test_accessible_mounts_on_demand() {
    let f = Fixture::new();
    let storage = f.storage(f.healthy_initiator(), &conf());

    storage.accessible().await.unwrap();
    assert!(storage.is_connected().await);

    fs::remove_file(f.dev.join("sdb")).unwrap();
    let err = storage.accessible().await.unwrap_err();
    assert!(matches!(err, StorageError::DeviceNotFound { .. }));
    assert_eq!(f.verbs(), vec!["discovery", "login"]);
}

#[tokio::test]
async fn test_disks_follow_attach_state() {
    let f = Fixture::new();
    let storage = f.storage(f.healthy_initiator(), &conf());

    let err = storage.get_disk_by_id("disk-1").await.err().unwrap();
    assert!(matches!(err, StorageError::DeviceNotFound { .. }));

    storage.mount().await.unwrap();
    let disk = storage.get_disk_by_id("disk-1").await.unwrap();
    assert_eq!(disk.id(), "disk-1");
    assert_eq!(disk.path().await, Some(f.device()));
    assert!(storage.disks_path().is_empty());

    storage.remove_disk("disk-1").await;
    storage.unmount().await.unwrap();
    assert!(disk.path().await.is_none());
}

#[tokio::test]
async fn test_unsupported_surface() {
    let f = Fixture::new();
    let storage = f.storage(MockInitiator::new(), &conf());
    let disk = storage.create_disk("disk-1").await;
    let params = json!({});

    assert!(storage.snapshot_dir().is_none());
    assert!(storage.backup_dir().is_none());
    assert!(storage.fuse_mount_path().is_none());
    assert!(storage.is_snapshot_exist("disk-1", "snap").await.unwrap_err().is_unsupported());
    assert!(storage.delete_snapshot(&params).await.unwrap_err().is_unsupported());
    assert!(storage
        .create_disk_from_snapshot(disk.as_ref(), &params)
        .await
        .unwrap_err()
        .is_unsupported());
    assert!(storage
        .clone_disk_from_storage(disk.as_ref(), "disk-2", true)
        .await
        .unwrap_err()
        .is_unsupported());
    assert!(storage.disk_migrate(&params).await.unwrap_err().is_unsupported());
    assert!(storage.storage_backup(&params).await.unwrap_err().is_unsupported());
    assert!(!storage.lvmlockd());
    storage.clean_recycle_diskfiles().await;
}

#[tokio::test]
async fn test_reconcile_adopts_live_session() {
    let f = Fixture::new();
    publish_device(&f.dev, &f.by_path);
    let initiator = f.initiator(|command| match command {
        InitiatorCommand::ListSessions => CommandOutput::ok(&format!(
            "tcp: [3] {},1 {} (non-flash)\n",
            PORTAL, IQN
        )),
        _ => CommandOutput::ok(""),
    });
    let storage = f.storage(initiator, &conf());

    assert!(storage.reconcile_session().await.unwrap());
    assert_eq!(storage.device_path().await, Some(f.device()));

    storage.mount().await.unwrap();
    assert_eq!(f.verbs(), vec!["list sessions"]);
}

#[tokio::test]
async fn test_reconcile_without_session() {
    let f = Fixture::new();
    let storage = f.storage(f.healthy_initiator(), &conf());

    assert!(!storage.reconcile_session().await.unwrap());
    assert_eq!(storage.connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_operations_need_loaded_info() {
    let f = Fixture::new();
    let mut storage = IscsiStorage::new("/mnt/iscsi", &f.config(), Arc::new(MockInitiator::new()));

    assert!(matches!(
        storage.mount().await.unwrap_err(),
        StorageError::BadRequest { .. }
    ));
    storage.unmount().await.unwrap();
    storage.detach().await.unwrap();
    assert!(storage
        .set_storage_info("s1", "pool", &json!({"target": "192.168.1.100"}))
        .is_err());
    assert!(storage.conf().is_none());
}

#[tokio::test]
async fn test_load_storage_through_registry() {
    let f = Fixture::new();
    let registry = StorageFactoryRegistry::builder()
        .register(
            StorageType::Iscsi,
            iscsi_factory(f.config(), Arc::new(f.healthy_initiator())),
        )
        .build();

    let mut record = StorageRecord::new("s1".to_string(), "iscsi-pool".to_string(), StorageType::Iscsi, conf());
    record.zone_id = Some("zone-a".to_string());

    let storage = crate::agent::load_storage(&registry, &record, "/mnt/iscsi").await.unwrap();
    assert_eq!(storage.storage_id(), "s1");
    assert!(!storage.is_connected().await);
    assert_eq!(f.verbs(), vec!["list sessions"]);

    let info = storage.sync_info();
    assert_eq!(info.name, "iscsi-pool");
    assert_eq!(info.status, StorageStatus::Online);
    assert_eq!(info.zone.as_deref(), Some("zone-a"));

    record.storage_conf = json!({"portal": PORTAL});
    assert!(crate::agent::load_storage(&registry, &record, "/mnt/iscsi").await.is_err());
}
