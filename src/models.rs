use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// SSH connection parameters for a replica, possibly partial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// The `host` field of a replica: either an ssh config nickname or explicit
/// connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostReference {
    Alias(String),
    Explicit(HostDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Key of the replica in the `replicas` mapping. Filled in after loading,
    /// never written inside the replica body.
    #[serde(skip)]
    pub alias: String,
    pub path: String,
    pub host: HostReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneralSettings {
    pub local: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    pub ask_confirm: bool,
    pub compress: bool,
    pub debug: bool,
}

/// Root document of `.psync.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectConfig {
    pub replicas: BTreeMap<String, ReplicaConfig>,
    pub general: GeneralSettings,
}

impl HostDescriptor {
    pub fn explicit(user: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            alias: None,
            user: Some(user.into()),
            hostname: Some(hostname.into()),
            port: Some(port),
        }
    }

    pub fn from_alias_only(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            ..Self::default()
        }
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        let hostname = self
            .hostname
            .as_deref()
            .or(self.alias.as_deref())
            .unwrap_or("<no-host>");
        write!(f, "{}:{}", hostname, self.port.unwrap_or(22))
    }
}

impl HostReference {
    /// View the reference as a (possibly partial) descriptor.
    pub fn descriptor(&self) -> HostDescriptor {
        match self {
            HostReference::Alias(alias) => HostDescriptor::from_alias_only(alias.clone()),
            HostReference::Explicit(descriptor) => descriptor.clone(),
        }
    }
}

impl fmt::Display for HostReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostReference::Alias(alias) => write!(f, "{}", alias),
            HostReference::Explicit(descriptor) => write!(f, "{}", descriptor),
        }
    }
}

impl fmt::Display for ReplicaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.host, self.path)
    }
}
