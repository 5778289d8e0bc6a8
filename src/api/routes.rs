//! Router construction

use axum::{
    http::{header, Method},
    routing::{any, get},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::Level;

use crate::api::{handlers, ws};
use crate::AppState;

/// Build the gateway router: REST and proxy routes under `/api`, subscriptions on `/ws`
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    // One span per request carrying method and uri, closed by a status/latency event
    let access_log = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let api = Router::new()
        .route("/health", get(handlers::gateway_health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/services",
            get(handlers::list_services).post(handlers::register_service),
        )
        .route(
            "/services/:id",
            get(handlers::get_service).delete(handlers::deregister_service),
        )
        .route("/proxy/:name", any(handlers::proxy_root))
        .route("/proxy/:name/*path", any(handlers::proxy_path));

    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::ws_handler))
        .layer(access_log)
        .layer(cors)
        .with_state(state)
}
