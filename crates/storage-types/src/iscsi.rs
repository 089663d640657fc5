use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SharedResult, SharedTypeError};

/// RFC 3720 ceiling for qualified names.
pub const MAX_IQN_LEN: usize = 223;

pub const MAX_LUN_ID: u8 = u8::MAX;

/// iSCSI configuration persisted on the owning storage record.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiStorageConf {
    pub target: String,
    pub iqn: String,
    pub portal: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub lun_id: u8,
}

impl IscsiStorageConf {
    /// Decode the opaque configuration blob of a storage record.
    pub fn from_value(value: &Value) -> SharedResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| SharedTypeError::ParseError(format!("iSCSI storage config: {}", e)))
    }

    pub fn to_value(&self) -> Value {
        // Plain strings and an integer, serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity {
            target: self.target.clone(),
            iqn: self.iqn.clone(),
            portal: self.portal.clone(),
            lun_id: self.lun_id,
        }
    }

    /// CHAP credentials, present only when both halves are set.
    pub fn credentials(&self) -> Option<ChapCredentials> {
        if self.username.is_empty() || self.password.is_empty() {
            return None;
        }
        Some(ChapCredentials {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }

    /// Host part of the portal, without brackets for IPv6 literals.
    pub fn portal_host(&self) -> &str {
        split_host_port(&self.portal)
            .map(|(host, _)| host)
            .unwrap_or(self.portal.as_str())
    }
}

impl fmt::Debug for IscsiStorageConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IscsiStorageConf")
            .field("target", &self.target)
            .field("iqn", &self.iqn)
            .field("portal", &self.portal)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("lun_id", &self.lun_id)
            .finish()
    }
}

/// The tuple that names one attachment path to a logical volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionIdentity {
    pub target: String,
    pub iqn: String,
    pub portal: String,
    pub lun_id: u8,
}

impl ConnectionIdentity {
    /// Two identities behind the same target, iqn and portal share one
    /// image cache regardless of the LUN.
    pub fn shares_cache_with(&self, other: &ConnectionIdentity) -> bool {
        self.target == other.target && self.iqn == other.iqn && self.portal == other.portal
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target={}, iqn={}, portal={}, lun_id={}",
            self.target, self.iqn, self.portal, self.lun_id
        )
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ChapCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ChapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChapCredentials")
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

/// Split `host:port` or `[v6]:port` into its parts. Bare IPv6 literals
/// without brackets are ambiguous and rejected.
pub fn split_host_port(addr: &str) -> Result<(&str, &str), String> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| format!("address {}: missing ']' in address", addr))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| format!("address {}: missing port in address", addr))?;
        return Ok((host, port));
    }

    match addr.rsplit_once(':') {
        None => Err(format!("address {}: missing port in address", addr)),
        Some((host, _)) if host.contains(':') => {
            Err(format!("address {}: too many colons in address", addr))
        }
        Some((host, port)) => Ok((host, port)),
    }
}
