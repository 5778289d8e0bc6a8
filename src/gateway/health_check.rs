//! Health checker for registered instances
//!
//! Each tick snapshots the registry, probes every instance in parallel
//! outside any lock, then folds each result back under a brief write lock.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::HealthCheckConfig;
use crate::error::{AppError, Result};
use crate::gateway::task::PeriodicTask;
use crate::registry::{InstanceStatus, ProbeApplied, ServiceInstance, ServiceRegistry};

/// Outcome of probing one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(String),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Checks whether a single instance is alive
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, instance: &ServiceInstance) -> ProbeOutcome;
}

/// Probe issuing `GET <path>` against the instance, healthy on any 2xx
pub struct HttpHealthProbe {
    client: Client,
    path: String,
}

impl HttpHealthProbe {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            path: path.into(),
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, instance: &ServiceInstance) -> ProbeOutcome {
        let url = format!("{}{}", instance.base_url(), self.path);

        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Healthy,
            Ok(response) => ProbeOutcome::Unhealthy(format!("status {}", response.status())),
            Err(e) if e.is_timeout() => ProbeOutcome::Unhealthy("timeout".to_string()),
            Err(e) => ProbeOutcome::Unhealthy(e.to_string()),
        }
    }
}

/// Summary of one health check pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCheckReport {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub evicted: usize,
}

/// Periodic prober that owns instance status transitions
pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    task: Mutex<Option<PeriodicTask>>,
}

impl HealthChecker {
    /// Create a health checker probing over HTTP per `config`
    pub fn new(registry: Arc<ServiceRegistry>, config: &HealthCheckConfig) -> Result<Self> {
        let probe = HttpHealthProbe::new(config.path.clone(), config.timeout())?;
        Ok(Self::with_probe(registry, Arc::new(probe), config.interval()))
    }

    /// Create a health checker with a custom probe
    pub fn with_probe(
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn HealthProbe>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            probe,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Probe every registered instance once
    pub async fn run_once(&self) -> HealthCheckReport {
        let snapshot = self.registry.list();

        let outcomes = join_all(snapshot.values().map(|instance| async move {
            (instance, self.probe.probe(instance).await)
        }))
        .await;

        let mut report = HealthCheckReport::default();
        for (instance, outcome) in outcomes {
            report.checked += 1;

            match self.registry.apply_probe_result(instance, outcome.is_healthy()) {
                ProbeApplied::Transition { from, to } => {
                    log_transition(instance, from, to, &outcome);
                }
                ProbeApplied::Unchanged(status) => {
                    if let ProbeOutcome::Unhealthy(reason) = &outcome {
                        warn!(
                            id = %instance.id,
                            name = %instance.name,
                            reason = %reason,
                            "Service health check failed"
                        );
                    }
                    debug!(id = %instance.id, status = %status, "Health check completed");
                }
                ProbeApplied::Evicted { .. } => {
                    report.evicted += 1;
                    continue;
                }
                ProbeApplied::Missing => {
                    debug!(id = %instance.id, "Instance deregistered during health check");
                    continue;
                }
                ProbeApplied::Stale => {
                    debug!(id = %instance.id, "Instance re-registered during health check, result dropped");
                    continue;
                }
            }

            if outcome.is_healthy() {
                report.healthy += 1;
            } else {
                report.unhealthy += 1;
            }
        }

        debug!(
            checked = report.checked,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            evicted = report.evicted,
            "Health check pass completed"
        );

        report
    }

    /// Start the health check background task
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let checker = self.clone();
        *task = Some(PeriodicTask::spawn("health_check", self.interval, move || {
            let checker = checker.clone();
            async move {
                checker.run_once().await;
            }
        }));
    }

    /// Stop the health check background task
    pub async fn stop(&self, grace: Duration) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop(grace).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }
}

fn log_transition(
    instance: &ServiceInstance,
    from: InstanceStatus,
    to: InstanceStatus,
    outcome: &ProbeOutcome,
) {
    match outcome {
        ProbeOutcome::Healthy => info!(
            id = %instance.id,
            name = %instance.name,
            from = %from,
            to = %to,
            "Service marked healthy"
        ),
        ProbeOutcome::Unhealthy(reason) => warn!(
            id = %instance.id,
            name = %instance.name,
            from = %from,
            to = %to,
            reason = %reason,
            "Service marked unhealthy"
        ),
    }
}
