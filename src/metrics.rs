//! Request metrics and the proxy observation hooks

use axum::http::StatusCode;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Hook points invoked around every proxied request
pub trait RequestObserver: Send + Sync {
    fn on_request_start(&self, service: &str);

    fn on_request_end(&self, service: &str, duration: Duration, status: StatusCode);

    /// The caller went away before a response was produced
    fn on_request_cancelled(&self, service: &str, duration: Duration);
}

/// Per-service request counters
#[derive(Debug, Default)]
struct ServiceCounters {
    requests: u64,
    errors: u64,
    cancelled: u64,
    in_flight: u64,
    total_duration_ms: u64,
}

/// In-memory gateway metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests_total: AtomicU64,
    active_subscribers: AtomicUsize,
    services: DashMap<String, ServiceCounters>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn subscriber_connected(&self) {
        self.active_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_disconnected(&self) {
        // Saturating so a double release can never wrap the gauge
        let _ = self
            .active_subscribers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn active_subscribers(&self) -> usize {
        self.active_subscribers.load(Ordering::Relaxed)
    }

    /// Per-service counters as a serializable map
    pub fn services(&self) -> BTreeMap<String, ServiceMetrics> {
        self.services
            .iter()
            .map(|entry| {
                let counters = entry.value();
                let completed = counters.requests.saturating_sub(counters.in_flight);
                let average_duration_ms = if completed == 0 {
                    0.0
                } else {
                    counters.total_duration_ms as f64 / completed as f64
                };
                (
                    entry.key().clone(),
                    ServiceMetrics {
                        requests: counters.requests,
                        errors: counters.errors,
                        cancelled: counters.cancelled,
                        in_flight: counters.in_flight,
                        average_duration_ms,
                    },
                )
            })
            .collect()
    }
}

impl RequestObserver for GatewayMetrics {
    fn on_request_start(&self, service: &str) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let mut counters = self.services.entry(service.to_string()).or_default();
        counters.requests += 1;
        counters.in_flight += 1;
    }

    fn on_request_end(&self, service: &str, duration: Duration, status: StatusCode) {
        let mut counters = self.services.entry(service.to_string()).or_default();
        counters.in_flight = counters.in_flight.saturating_sub(1);
        counters.total_duration_ms += duration.as_millis() as u64;
        if status.is_server_error() {
            counters.errors += 1;
        }
    }

    fn on_request_cancelled(&self, service: &str, duration: Duration) {
        let mut counters = self.services.entry(service.to_string()).or_default();
        counters.in_flight = counters.in_flight.saturating_sub(1);
        counters.total_duration_ms += duration.as_millis() as u64;
        counters.cancelled += 1;
    }
}

/// Serializable view of one service's counters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceMetrics {
    pub requests: u64,
    pub errors: u64,
    pub cancelled: u64,
    pub in_flight: u64,
    pub average_duration_ms: f64,
}
