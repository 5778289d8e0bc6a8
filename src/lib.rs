//! Mesh Gateway
//!
//! An in-process service-mesh core: a registry of live backend instances,
//! a health checker probing them, a load balancer choosing one per request,
//! a reverse proxy forwarding traffic to it, and a broadcast hub pushing
//! registry snapshots to subscribers.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod metrics;
pub mod registry;

pub use error::{AppError, Result};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use gateway::{health_check::HealthChecker, load_balancer::LoadBalancer, proxy::ReverseProxy};
use hub::BroadcastHub;
use metrics::GatewayMetrics;
use registry::ServiceRegistry;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub registry: Arc<ServiceRegistry>,
    pub load_balancer: Arc<LoadBalancer>,
    pub health_checker: Arc<HealthChecker>,
    pub proxy: Arc<ReverseProxy>,
    pub hub: Arc<BroadcastHub>,
    pub metrics: Arc<GatewayMetrics>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build every component from `settings`. Background tasks are not started.
    pub fn new(settings: config::Settings) -> Result<Self> {
        let registry = Arc::new(ServiceRegistry::with_eviction_threshold(
            settings.health_check.eviction_threshold,
        ));
        let metrics = Arc::new(GatewayMetrics::new());

        let load_balancer = Arc::new(LoadBalancer::with_strategy(
            registry.clone(),
            settings.load_balancer.strategy,
        ));
        let health_checker = Arc::new(HealthChecker::new(registry.clone(), &settings.health_check)?);
        let proxy = Arc::new(ReverseProxy::new(
            load_balancer.clone(),
            metrics.clone(),
            &settings.proxy,
        )?);
        let hub = Arc::new(BroadcastHub::new(
            registry.clone(),
            metrics.clone(),
            &settings.broadcast,
        ));

        Ok(Self {
            settings: Arc::new(settings),
            registry,
            load_balancer,
            health_checker,
            proxy,
            hub,
            metrics,
            started_at: Utc::now(),
        })
    }

    /// Start the health checker and the broadcast timer
    pub fn start_background_tasks(&self) {
        self.health_checker.start();
        self.hub.start();
    }

    /// Stop background tasks and disconnect every subscriber, finishing by `deadline`.
    ///
    /// Each step gets whatever time the previous ones left over.
    pub async fn shutdown(&self, deadline: Instant) {
        self.hub.close(deadline.saturating_duration_since(Instant::now())).await;
        self.health_checker
            .stop(deadline.saturating_duration_since(Instant::now()))
            .await;
        info!("Background tasks stopped");
    }
}
