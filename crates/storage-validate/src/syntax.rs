//! Syntax validation for iSCSI storage parameters
//!
//! Address literals, qualified names and CHAP credential shape. Nothing in
//! here touches the network or the persistence layer.

use std::net::IpAddr;
use std::ops::RangeInclusive;

use regex::Regex;

use cloud_storage_core::{StorageError, StorageResult};
use cloud_storage_types::{split_host_port, MAX_IQN_LEN};

const IQN_PATTERN: &str = r"^iqn\.\d{4}-\d{2}\.([a-zA-Z0-9\-\.]+):([a-zA-Z0-9\-\._:]+)$";

const MAX_CREDENTIAL_LEN: usize = 255;

/// Syntax validator for iSCSI connection parameters
pub struct IscsiSyntaxValidator {
    /// `iqn.yyyy-mm.naming-authority:unique-name`
    iqn_regex: Regex,
    port_range: RangeInclusive<u32>,
}

impl IscsiSyntaxValidator {
    pub fn new() -> Self {
        Self {
            iqn_regex: Regex::new(IQN_PATTERN).expect("IQN pattern is a valid regex"),
            port_range: 1..=65535,
        }
    }

    /// Target must be a bare IPv4 or IPv6 literal; hostnames are rejected.
    pub fn validate_target(&self, target: &str) -> StorageResult<()> {
        if target.is_empty() {
            return Err(StorageError::missing("iscsi_target"));
        }
        target
            .parse::<IpAddr>()
            .map(|_| ())
            .map_err(|_| StorageError::invalid("iscsi_target", "invalid IP address format"))
    }

    pub fn validate_iqn(&self, iqn: &str) -> StorageResult<()> {
        if iqn.is_empty() {
            return Err(StorageError::missing("iscsi_iqn"));
        }
        if !self.iqn_regex.is_match(iqn) {
            return Err(StorageError::invalid(
                "iscsi_iqn",
                "IQN format must be 'iqn.yyyy-mm.naming-authority:unique-name'",
            ));
        }
        if iqn.len() > MAX_IQN_LEN {
            return Err(StorageError::invalid(
                "iscsi_iqn",
                format!("IQN length cannot exceed {} characters", MAX_IQN_LEN),
            ));
        }
        Ok(())
    }

    /// Portal is `host:port`, host an IP literal (IPv6 in brackets).
    pub fn validate_portal(&self, portal: &str) -> StorageResult<()> {
        if portal.is_empty() {
            return Err(StorageError::missing("iscsi_portal"));
        }
        let (host, port) = split_host_port(portal).map_err(|e| {
            StorageError::invalid(
                "iscsi_portal",
                format!("invalid portal format, expected 'IP:port': {}", e),
            )
        })?;

        if host.parse::<IpAddr>().is_err() {
            return Err(StorageError::invalid(
                "iscsi_portal",
                "invalid IP address in portal",
            ));
        }

        let port: u32 = port.parse().map_err(|e| {
            StorageError::invalid("iscsi_portal", format!("invalid port number: {}", e))
        })?;
        if !self.port_range.contains(&port) {
            return Err(StorageError::invalid(
                "iscsi_portal",
                "port number must be between 1 and 65535",
            ));
        }
        Ok(())
    }

    /// CHAP credentials come in pairs.
    pub fn validate_auth(&self, username: &str, password: &str) -> StorageResult<()> {
        self.check_auth(username, password)
            .map_err(|reason| StorageError::invalid("authentication parameters", reason))
    }

    fn check_auth(&self, username: &str, password: &str) -> Result<(), &'static str> {
        if !username.is_empty() && password.is_empty() {
            return Err("password is required when username is provided");
        }
        if !password.is_empty() && username.is_empty() {
            return Err("username is required when password is provided");
        }
        if !username.is_empty() {
            if username.len() > MAX_CREDENTIAL_LEN {
                return Err("username length cannot exceed 255 characters");
            }
            if username.contains([' ', '\t', '\n', '\r']) {
                return Err("username cannot contain whitespace characters");
            }
        }
        if password.len() > MAX_CREDENTIAL_LEN {
            return Err("password length cannot exceed 255 characters");
        }
        Ok(())
    }
}

impl Default for IscsiSyntaxValidator {
    fn default() -> Self {
        Self::new()
    }
}
