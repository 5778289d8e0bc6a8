//! Load balancer implementation with multiple strategies
//!
//! The balancer keeps no instance data of its own. Every selection reads
//! the healthy set from the registry, so the two can never diverge. The
//! only state held here is a rotation cursor per service name and the
//! number of in-flight requests per instance.

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::registry::{ServiceInstance, ServiceRegistry};

/// Load balancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Round-robin distribution
    #[default]
    RoundRobin,
    /// Fewest in-flight requests, ties broken in round-robin order
    LeastConnections,
    /// Uniform random selection
    Random,
}

/// In-flight request counts keyed by instance id
type InFlight = Arc<DashMap<String, usize>>;

/// Load balancer for distributing requests across instances of a service
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    strategy: LoadBalancingStrategy,
    cursors: DashMap<String, usize>,
    in_flight: InFlight,
}

impl LoadBalancer {
    /// Create a new round-robin load balancer
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self::with_strategy(registry, LoadBalancingStrategy::default())
    }

    /// Create a load balancer with a fixed strategy
    pub fn with_strategy(registry: Arc<ServiceRegistry>, strategy: LoadBalancingStrategy) -> Self {
        Self {
            registry,
            strategy,
            cursors: DashMap::new(),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Get the load balancing strategy
    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    /// Select an instance of `name` for one request.
    ///
    /// The returned lease counts as in-flight until it is dropped.
    pub fn select(&self, name: &str) -> Result<Lease> {
        // The cursor entry stays locked while the healthy set is read so
        // concurrent selections for the same name are serialized.
        let mut cursor = self.cursors.entry(name.to_string()).or_insert(0);

        let healthy = self.registry.get_healthy(name);
        if healthy.is_empty() {
            return Err(AppError::ServiceNotAvailable(name.to_string()));
        }

        let index = match self.strategy {
            LoadBalancingStrategy::RoundRobin => *cursor % healthy.len(),
            LoadBalancingStrategy::LeastConnections => self.least_connections(&healthy, *cursor),
            LoadBalancingStrategy::Random => rand::thread_rng().gen_range(0..healthy.len()),
        };
        *cursor = cursor.wrapping_add(1);

        let instance = healthy.into_iter().nth(index).ok_or_else(|| {
            AppError::Internal(format!("Selected index {} out of range for {}", index, name))
        })?;
        *self.in_flight.entry(instance.id.clone()).or_insert(0) += 1;

        debug!(
            service = %name,
            instance = %instance.id,
            strategy = ?self.strategy,
            "Selected instance for request"
        );

        Ok(Lease {
            instance,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Index of the instance with the fewest in-flight requests, scanning
    /// from the rotation cursor so ties rotate.
    fn least_connections(&self, healthy: &[ServiceInstance], cursor: usize) -> usize {
        let len = healthy.len();
        let start = cursor % len;
        (0..len)
            .map(|offset| (start + offset) % len)
            .min_by_key(|&index| self.in_flight(&healthy[index].id))
            .unwrap_or(start)
    }

    /// Current in-flight request count for an instance
    pub fn in_flight(&self, instance_id: &str) -> usize {
        self.in_flight.get(instance_id).map(|count| *count).unwrap_or(0)
    }

    /// Total in-flight requests across all instances
    pub fn total_in_flight(&self) -> usize {
        self.in_flight.iter().map(|entry| *entry.value()).sum()
    }
}

/// A selected instance, counted as in-flight for as long as it is held
pub struct Lease {
    instance: ServiceInstance,
    in_flight: InFlight,
}

impl Lease {
    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }
}

impl Deref for Lease {
    type Target = ServiceInstance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let id = &self.instance.id;
        let now_idle = match self.in_flight.get_mut(id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if now_idle {
            self.in_flight.remove_if(id, |_, count| *count == 0);
        }
    }
}
