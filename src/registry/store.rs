//! In-memory service registry
//!
//! The registry is the only owner of instance records and their health
//! status. All access goes through a single reader/writer lock that is
//! never held across I/O.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::registry::types::{InstanceStatus, ProbeApplied, RegisterRequest, ServiceInstance};

/// Point-in-time copy of the registry, keyed and ordered by instance id
pub type Snapshot = BTreeMap<String, ServiceInstance>;

/// Authoritative mapping of instance id to instance record
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<String, ServiceInstance>>,
    /// Consecutive failed probes before eviction, 0 disables
    eviction_threshold: u32,
    registrations: AtomicU64,
}

impl ServiceRegistry {
    /// Create a registry that never evicts instances on its own
    pub fn new() -> Self {
        Self::with_eviction_threshold(0)
    }

    pub fn with_eviction_threshold(eviction_threshold: u32) -> Self {
        Self {
            services: RwLock::new(BTreeMap::new()),
            eviction_threshold,
            registrations: AtomicU64::new(0),
        }
    }

    /// Insert or update an instance, returning its id
    pub fn register(&self, request: RegisterRequest) -> Result<String> {
        request.validate().map_err(AppError::Validation)?;

        let now = Utc::now();
        let mut services = self.services.write();

        let id = match request.explicit_id() {
            Some(id) => id.to_string(),
            None => generate_id(&services, &request.name, now.timestamp_millis()),
        };

        let updated = services.contains_key(&id);
        info!(
            id = %id,
            name = %request.name,
            address = %request.address,
            port = request.port,
            updated,
            "Service registered"
        );

        services.insert(
            id.clone(),
            ServiceInstance {
                id: id.clone(),
                name: request.name,
                address: request.address,
                port: request.port,
                status: InstanceStatus::Unknown,
                last_seen: now,
                metadata: request.metadata,
                consecutive_failures: 0,
                registration: self.registrations.fetch_add(1, Ordering::Relaxed),
            },
        );

        Ok(id)
    }

    /// Remove an instance. Unknown ids are ignored.
    pub fn deregister(&self, id: &str) -> bool {
        match self.services.write().remove(id) {
            Some(instance) => {
                info!(id = %id, name = %instance.name, "Service deregistered");
                true
            }
            None => {
                debug!(id = %id, "Deregistration of unknown instance ignored");
                false
            }
        }
    }

    /// Consistent copy of every record
    pub fn list(&self) -> Snapshot {
        self.services.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<ServiceInstance> {
        self.services.read().get(id).cloned()
    }

    /// Healthy instances of `name`, ordered by id
    pub fn get_healthy(&self, name: &str) -> Vec<ServiceInstance> {
        self.services
            .read()
            .values()
            .filter(|instance| instance.name == name && instance.is_healthy())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Fold a probe result into the record for `id`, whichever
    /// registration it currently holds.
    pub fn apply_probe(&self, id: &str, healthy: bool) -> ProbeApplied {
        let mut services = self.services.write();
        self.fold_probe(&mut services, id, healthy)
    }

    /// Fold the result of probing `probed`, a record taken from an earlier
    /// snapshot.
    ///
    /// Called by the health checker after the probe finished, so the
    /// exclusive lock only covers the map update. The result is dropped if
    /// the id has been re-registered since the snapshot.
    pub fn apply_probe_result(&self, probed: &ServiceInstance, healthy: bool) -> ProbeApplied {
        let mut services = self.services.write();
        let current = services.get(&probed.id).map(|instance| instance.registration);
        match current {
            None => ProbeApplied::Missing,
            Some(registration) if registration != probed.registration => ProbeApplied::Stale,
            Some(_) => self.fold_probe(&mut services, &probed.id, healthy),
        }
    }

    fn fold_probe(
        &self,
        services: &mut BTreeMap<String, ServiceInstance>,
        id: &str,
        healthy: bool,
    ) -> ProbeApplied {
        let Some(instance) = services.get_mut(id) else {
            return ProbeApplied::Missing;
        };

        let previous = instance.status;
        if healthy {
            instance.status = InstanceStatus::Healthy;
            instance.last_seen = Utc::now();
            instance.consecutive_failures = 0;
        } else {
            instance.status = InstanceStatus::Unhealthy;
            instance.consecutive_failures = instance.consecutive_failures.saturating_add(1);

            if self.eviction_threshold > 0 && instance.consecutive_failures >= self.eviction_threshold {
                let consecutive_failures = instance.consecutive_failures;
                if let Some(evicted) = services.remove(id) {
                    warn!(
                        id = %id,
                        name = %evicted.name,
                        consecutive_failures,
                        "Instance evicted after consecutive failed probes"
                    );
                }
                return ProbeApplied::Evicted { consecutive_failures };
            }
        }

        if previous == instance.status {
            ProbeApplied::Unchanged(previous)
        } else {
            ProbeApplied::Transition {
                from: previous,
                to: instance.status,
            }
        }
    }

    /// Number of instances per status for every service name
    pub fn status_counts(&self) -> BTreeMap<String, StatusCounts> {
        let services = self.services.read();
        let mut counts: BTreeMap<String, StatusCounts> = BTreeMap::new();
        for instance in services.values() {
            let entry = counts.entry(instance.name.clone()).or_default();
            match instance.status {
                InstanceStatus::Healthy => entry.healthy += 1,
                InstanceStatus::Unhealthy => entry.unhealthy += 1,
                InstanceStatus::Unknown => entry.unknown += 1,
            }
        }
        counts
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Instance counts by status for one service name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

/// `<name>-<millis>`, suffixed when that id is already taken
fn generate_id(services: &BTreeMap<String, ServiceInstance>, name: &str, millis: i64) -> String {
    let base = format!("{}-{}", name, millis);
    if !services.contains_key(&base) {
        return base;
    }
    (1u32..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !services.contains_key(candidate))
        .unwrap_or(base)
}
