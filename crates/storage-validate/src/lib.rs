//! iSCSI storage configuration validation
//!
//! Creation requests are checked for shape, duplicate identity and portal
//! reachability before a record exists. Update requests may only change
//! CHAP credentials, and only after the persisted portal answers again.

pub mod probe;
pub mod syntax;

pub use probe::{ConnectivityProbe, ProbeError, TcpProbe};
pub use syntax::IscsiSyntaxValidator;

use std::sync::Arc;

use log::{debug, info};

use cloud_storage_core::{StorageError, StorageQuery, StorageRepository, StorageResult};
use cloud_storage_types::{
    IscsiStorageConf, StorageCreateInput, StorageType, StorageUpdateInput, MAX_LUN_ID,
};

/// Validator for iSCSI creation and credential update requests
pub struct IscsiConfigValidator {
    syntax: IscsiSyntaxValidator,
    probe: Arc<dyn ConnectivityProbe>,
}

impl IscsiConfigValidator {
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            syntax: IscsiSyntaxValidator::new(),
            probe,
        }
    }

    pub fn syntax(&self) -> &IscsiSyntaxValidator {
        &self.syntax
    }

    /// Validate a creation request and write the normalized configuration
    /// blob into `input.storage_conf`. Nothing is written on failure.
    pub async fn validate_create(
        &self,
        input: &mut StorageCreateInput,
        repository: &dyn StorageRepository,
    ) -> StorageResult<()> {
        let target = input.iscsi_target.trim();
        let iqn = input.iscsi_iqn.trim();
        let portal = input.iscsi_portal.trim();
        let username = input.iscsi_username.trim();
        let password = input.iscsi_password.trim();

        self.syntax.validate_target(target)?;
        self.syntax.validate_iqn(iqn)?;
        self.syntax.validate_portal(portal)?;
        self.syntax.validate_auth(username, password)?;
        let lun_id = normalize_lun_id(input.iscsi_lun_id)?;

        let conf = IscsiStorageConf {
            target: target.to_string(),
            iqn: iqn.to_string(),
            portal: portal.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            lun_id,
        };

        self.check_duplicate(&conf, repository).await?;

        self.probe
            .probe(&conf.portal)
            .await
            .map_err(|e| StorageError::Unreachable {
                message: format!("iSCSI connection test failed: {}", e),
            })?;

        debug!("Validated iSCSI storage {:?}", conf);
        input.iscsi_lun_id = i64::from(lun_id);
        input.storage_conf = conf.to_value();
        Ok(())
    }

    /// Validate a credential update against the record's existing
    /// configuration, seeded into `input.storage_conf` by the caller.
    pub async fn validate_update(&self, input: &mut StorageUpdateInput) -> StorageResult<()> {
        let username = input.iscsi_username.trim().to_string();
        let password = input.iscsi_password.trim().to_string();
        if username.is_empty() && password.is_empty() {
            return Ok(());
        }
        self.syntax.validate_auth(&username, &password)?;

        let portal = {
            let target = input.conf_str("target");
            let iqn = input.conf_str("iqn");
            let portal = input.conf_str("portal");
            if target.is_empty() || iqn.is_empty() || portal.is_empty() {
                return Err(StorageError::BadRequest {
                    message: "missing required iSCSI configuration parameters".to_string(),
                });
            }
            portal.to_string()
        };

        self.probe
            .probe(&portal)
            .await
            .map_err(|e| StorageError::Unreachable {
                message: format!(
                    "iSCSI connection test failed with updated configuration: {}",
                    e
                ),
            })?;

        info!("Portal {} reachable, applying updated credentials", portal);
        input
            .storage_conf
            .insert("username".to_string(), username.into());
        input
            .storage_conf
            .insert("password".to_string(), password.into());
        input.update_storage_conf = true;
        Ok(())
    }

    async fn check_duplicate(
        &self,
        conf: &IscsiStorageConf,
        repository: &dyn StorageRepository,
    ) -> StorageResult<()> {
        let query = StorageQuery::storage_type(StorageType::Iscsi)
            .target(&conf.target)
            .iqn(&conf.iqn)
            .portal(&conf.portal)
            .lun_id(conf.lun_id);

        let existing = repository.find_storages(&query).await?;
        match existing.first().and_then(|record| record.connection_identity()) {
            Some(identity) => Err(StorageError::DuplicateResource {
                message: format!("iSCSI storage with {} already exists", identity),
            }),
            None => Ok(()),
        }
    }
}

/// Negative means "not given" and becomes LUN 0.
fn normalize_lun_id(lun_id: i64) -> StorageResult<u8> {
    if lun_id < 0 {
        return Ok(0);
    }
    u8::try_from(lun_id).map_err(|_| {
        StorageError::invalid(
            "iscsi_lun_id",
            format!("LUN ID must be between 0 and {}", MAX_LUN_ID),
        )
    })
}
