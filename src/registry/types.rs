//! Service instance records and registration payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Health status of a registered instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Registered but not yet probed
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Unknown => "unknown",
            InstanceStatus::Healthy => "healthy",
            InstanceStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// One running backend process known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Failed probes since the last successful one
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Changes every time the id is (re-)registered
    #[serde(skip)]
    pub registration: u64,
}

impl ServiceInstance {
    /// `host:port` authority used for probes and proxying
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Base URL of the instance, without a trailing slash
    pub fn base_url(&self) -> String {
        format!("http://{}", self.authority())
    }

    pub fn is_healthy(&self) -> bool {
        self.status == InstanceStatus::Healthy
    }
}

/// Registration payload accepted by `POST /services`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RegisterRequest {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: None,
            name: name.into(),
            address: address.into(),
            port,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check the fields every instance needs to be probed and proxied to
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.address.trim().is_empty() {
            return Err("address must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("port must be positive".to_string());
        }
        Ok(())
    }

    /// Caller-supplied id, ignoring blank strings
    pub fn explicit_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

/// Result of folding one probe outcome into the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeApplied {
    /// Status changed
    Transition {
        from: InstanceStatus,
        to: InstanceStatus,
    },
    /// Status stayed the same
    Unchanged(InstanceStatus),
    /// Removed after too many consecutive failures
    Evicted { consecutive_failures: u32 },
    /// The instance was deregistered while the probe was in flight
    Missing,
    /// The instance was re-registered while the probe was in flight
    Stale,
}
