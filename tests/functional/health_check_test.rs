//! Functional tests for HTTP health checking against live backends

mod common;

use common::{backend, closed_port, register, test_state};
use mesh_gateway::config::Settings;
use mesh_gateway::registry::{InstanceStatus, RegisterRequest};
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.health_check.timeout_ms = 500;
    settings
}

#[tokio::test]
async fn test_unknown_becomes_healthy() {
    let state = test_state(fast_settings());
    let server = backend(200).await;
    register(&state, "gen-1", "gen", &server);

    assert_eq!(state.registry.get("gen-1").unwrap().status, InstanceStatus::Unknown);
    assert!(state.registry.get_healthy("gen").is_empty());

    let before = state.registry.get("gen-1").unwrap().last_seen;
    let report = state.health_checker.run_once().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.healthy, 1);

    let instance = state.registry.get("gen-1").unwrap();
    assert_eq!(instance.status, InstanceStatus::Healthy);
    assert!(instance.last_seen >= before);
    assert_eq!(state.registry.get_healthy("gen").len(), 1);
}

#[tokio::test]
async fn test_error_status_marks_unhealthy_until_recovery() {
    let state = test_state(fast_settings());
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    register(&state, "gen-1", "gen", &server);

    state.health_checker.run_once().await;
    assert_eq!(state.registry.get("gen-1").unwrap().status, InstanceStatus::Unhealthy);
    assert!(state.registry.get_healthy("gen").is_empty());

    state.health_checker.run_once().await;
    let instance = state.registry.get("gen-1").unwrap();
    assert_eq!(instance.status, InstanceStatus::Unhealthy);
    assert_eq!(instance.consecutive_failures, 2);

    state.health_checker.run_once().await;
    let instance = state.registry.get("gen-1").unwrap();
    assert_eq!(instance.status, InstanceStatus::Healthy);
    assert_eq!(instance.consecutive_failures, 0);
}

#[tokio::test]
async fn test_unreachable_instance_is_unhealthy() {
    let state = test_state(fast_settings());
    state
        .registry
        .register(RegisterRequest::new("gen", "127.0.0.1", closed_port()).with_id("gen-1"))
        .unwrap();

    let report = state.health_checker.run_once().await;
    assert_eq!(report.unhealthy, 1);
    assert_eq!(state.registry.get("gen-1").unwrap().status, InstanceStatus::Unhealthy);
}

#[tokio::test]
async fn test_slow_instance_is_unhealthy() {
    let mut settings = fast_settings();
    settings.health_check.timeout_ms = 100;
    let state = test_state(settings);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    register(&state, "gen-1", "gen", &server);

    state.health_checker.run_once().await;
    assert_eq!(state.registry.get("gen-1").unwrap().status, InstanceStatus::Unhealthy);
}

#[tokio::test]
async fn test_repeated_failures_evict_instance() {
    let mut settings = fast_settings();
    settings.health_check.eviction_threshold = 2;
    let state = test_state(settings);

    let healthy = backend(200).await;
    let failing = backend(503).await;
    register(&state, "gen-1", "gen", &healthy);
    register(&state, "gen-2", "gen", &failing);

    let report = state.health_checker.run_once().await;
    assert_eq!(report.evicted, 0);
    assert!(state.registry.get("gen-2").is_some());

    let report = state.health_checker.run_once().await;
    assert_eq!(report.evicted, 1);
    assert!(state.registry.get("gen-2").is_none());
    assert!(state.registry.get("gen-1").is_some());
}

#[tokio::test]
async fn test_background_task_probes_and_stops() {
    let mut settings = fast_settings();
    settings.health_check.interval_secs = 1;
    let state = test_state(settings);

    let server = backend(200).await;
    register(&state, "gen-1", "gen", &server);

    state.start_background_tasks();
    assert!(state.health_checker.is_running());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.registry.get_healthy("gen").is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "instance never became healthy");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    state
        .shutdown(tokio::time::Instant::now() + Duration::from_secs(5))
        .await;
    assert!(!state.health_checker.is_running());
    assert!(!state.hub.is_accepting());
}

#[tokio::test]
async fn test_shutdown_honours_one_deadline() {
    let mut settings = fast_settings();
    settings.health_check.interval_secs = 1;
    settings.health_check.timeout_ms = 30_000;
    let state = test_state(settings);

    // Probes hang well past the deadline
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(20)))
        .mount(&server)
        .await;
    register(&state, "gen-1", "gen", &server);

    state.start_background_tasks();
    tokio::time::sleep(Duration::from_millis(1300)).await;

    let started = tokio::time::Instant::now();
    state.shutdown(started + Duration::from_millis(500)).await;

    assert!(started.elapsed() < Duration::from_millis(1500), "took {:?}", started.elapsed());
    assert!(!state.health_checker.is_running());
}
