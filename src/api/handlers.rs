//! HTTP handlers for registration, queries, proxying and gateway status

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::metrics::ServiceMetrics;
use crate::registry::{RegisterRequest, ServiceInstance, Snapshot, StatusCounts};
use crate::AppState;

/// `POST /services`
pub async fn register_service(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return registration_error(rejection.body_text()),
    };

    match state.registry.register(request) {
        Ok(service_id) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "service_id": service_id,
                "message": "Service registered successfully",
            })),
        )
            .into_response(),
        Err(AppError::Validation(message)) => registration_error(message),
        Err(e) => e.into_response(),
    }
}

fn registration_error(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

/// `GET /services`
pub async fn list_services(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(state.registry.list())
}

/// `GET /services/:id`
pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ServiceInstance>> {
    state
        .registry
        .get(&id)
        .map(Json)
        .ok_or(AppError::InstanceNotFound(id))
}

/// `DELETE /services/:id`, 200 whether or not the instance existed
pub async fn deregister_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let removed = state.registry.deregister(&id);
    Json(json!({ "success": true, "service_id": id, "removed": removed }))
}

/// `ANY /proxy/:name`
pub async fn proxy_root(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    request: Request,
) -> Response {
    state.proxy.forward(&name, "/", request).await
}

/// `ANY /proxy/:name/*path`
pub async fn proxy_path(
    State(state): State<Arc<AppState>>,
    Path((name, _)): Path<(String, String)>,
    request: Request,
) -> Response {
    let sub_path = raw_sub_path(request.uri().path());
    state.proxy.forward(&name, &sub_path, request).await
}

/// Path below `/proxy/{name}` exactly as the caller sent it, still percent-encoded
fn raw_sub_path(path: &str) -> String {
    let tail = path
        .split_once("/proxy/")
        .and_then(|(_, rest)| rest.split_once('/'))
        .map(|(_, tail)| tail)
        .unwrap_or("");
    format!("/{}", tail)
}

/// Gateway's own health report
#[derive(Debug, Serialize)]
pub struct GatewayHealth {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub version: &'static str,
    pub instances: usize,
    pub services: BTreeMap<String, StatusCounts>,
}

/// `GET /health`
pub async fn gateway_health(State(state): State<Arc<AppState>>) -> Json<GatewayHealth> {
    let now = Utc::now();
    Json(GatewayHealth {
        status: "healthy",
        timestamp: now,
        uptime_secs: (now - state.started_at).num_seconds(),
        version: env!("CARGO_PKG_VERSION"),
        instances: state.registry.len(),
        services: state.registry.status_counts(),
    })
}

/// Metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsReport {
    pub requests_total: u64,
    pub in_flight: usize,
    pub active_subscribers: usize,
    pub registered_instances: usize,
    pub services: BTreeMap<String, ServiceMetrics>,
    /// Healthy instance count per service name
    pub service_health: BTreeMap<String, usize>,
}

/// `GET /metrics`
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsReport> {
    let service_health = state
        .registry
        .status_counts()
        .into_iter()
        .map(|(name, counts)| (name, counts.healthy))
        .collect();

    Json(MetricsReport {
        requests_total: state.metrics.requests_total(),
        in_flight: state.load_balancer.total_in_flight(),
        active_subscribers: state.metrics.active_subscribers(),
        registered_instances: state.registry.len(),
        services: state.metrics.services(),
        service_health,
    })
}
