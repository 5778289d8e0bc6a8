//! Unit tests for instance selection

use mesh_gateway::error::AppError;
use mesh_gateway::gateway::load_balancer::{LoadBalancer, LoadBalancingStrategy};
use mesh_gateway::registry::{RegisterRequest, ServiceRegistry};
use std::collections::HashMap;
use std::sync::Arc;

fn registry_with_healthy(name: &str, count: usize) -> Arc<ServiceRegistry> {
    let registry = Arc::new(ServiceRegistry::new());
    for n in 1..=count {
        let id = format!("{}-{}", name, n);
        registry
            .register(RegisterRequest::new(name, "127.0.0.1", 9000 + n as u16).with_id(&id))
            .unwrap();
        registry.apply_probe(&id, true);
    }
    registry
}

#[test]
fn test_round_robin_is_fair() {
    let lb = LoadBalancer::new(registry_with_healthy("gen", 3));

    for n in [1usize, 5, 7, 30] {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..n {
            *counts.entry(lb.select("gen").unwrap().id.clone()).or_default() += 1;
        }
        for count in counts.values() {
            assert!(*count == n / 3 || *count == n.div_ceil(3), "unfair split {:?}", counts);
        }
    }
}

#[test]
fn test_not_available_is_deterministic() {
    let registry = Arc::new(ServiceRegistry::new());
    registry
        .register(RegisterRequest::new("gen", "127.0.0.1", 9000).with_id("gen-1"))
        .unwrap();
    let lb = LoadBalancer::new(registry.clone());

    // Unknown service, and a service whose only instance is not yet healthy
    for _ in 0..5 {
        assert!(matches!(lb.select("unknownservice"), Err(AppError::ServiceNotAvailable(_))));
        assert!(matches!(lb.select("gen"), Err(AppError::ServiceNotAvailable(_))));
    }

    registry.apply_probe("gen-1", true);
    assert_eq!(lb.select("gen").unwrap().id, "gen-1");

    registry.apply_probe("gen-1", false);
    assert!(matches!(lb.select("gen"), Err(AppError::ServiceNotAvailable(_))));
}

#[test]
fn test_membership_change_keeps_rotating() {
    let registry = registry_with_healthy("gen", 3);
    let lb = LoadBalancer::new(registry.clone());

    lb.select("gen").unwrap();
    lb.select("gen").unwrap();

    registry.deregister("gen-3");
    let picked: Vec<String> = (0..4).map(|_| lb.select("gen").unwrap().id.clone()).collect();
    assert_eq!(picked, vec!["gen-1", "gen-2", "gen-1", "gen-2"]);
}

#[test]
fn test_reads_live_registry_state() {
    let registry = registry_with_healthy("gen", 2);
    let lb = LoadBalancer::new(registry.clone());

    registry
        .register(RegisterRequest::new("gen", "127.0.0.1", 9100).with_id("gen-9"))
        .unwrap();
    registry.apply_probe("gen-9", true);

    let mut seen: Vec<String> = (0..3).map(|_| lb.select("gen").unwrap().id.clone()).collect();
    seen.sort();
    assert_eq!(seen, vec!["gen-1", "gen-2", "gen-9"]);
}

#[test]
fn test_services_rotate_independently() {
    let registry = registry_with_healthy("gen", 2);
    registry
        .register(RegisterRequest::new("db", "127.0.0.1", 5432).with_id("db-1"))
        .unwrap();
    registry.apply_probe("db-1", true);
    let lb = LoadBalancer::new(registry);

    assert_eq!(lb.select("gen").unwrap().id, "gen-1");
    assert_eq!(lb.select("db").unwrap().id, "db-1");
    assert_eq!(lb.select("gen").unwrap().id, "gen-2");
}

#[test]
fn test_concurrent_selection_is_exactly_fair() {
    let lb = Arc::new(LoadBalancer::new(registry_with_healthy("gen", 3)));
    let counts = Arc::new(parking_lot::Mutex::new(HashMap::<String, usize>::new()));

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let lb = lb.clone();
            let counts = counts.clone();
            scope.spawn(move || {
                for _ in 0..300 {
                    let id = lb.select("gen").unwrap().id.clone();
                    *counts.lock().entry(id).or_default() += 1;
                }
            });
        }
    });

    let counts = counts.lock();
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|count| *count == 400));
}

#[test]
fn test_least_connections_ties_follow_rotation() {
    let lb = LoadBalancer::with_strategy(
        registry_with_healthy("gen", 3),
        LoadBalancingStrategy::LeastConnections,
    );

    // Leases dropped immediately, so every pick is a tie
    let picked: Vec<String> = (0..6).map(|_| lb.select("gen").unwrap().id.clone()).collect();
    assert_eq!(picked, vec!["gen-1", "gen-2", "gen-3", "gen-1", "gen-2", "gen-3"]);
}

#[test]
fn test_random_with_no_healthy_instances() {
    let lb = LoadBalancer::with_strategy(Arc::new(ServiceRegistry::new()), LoadBalancingStrategy::Random);
    assert!(matches!(lb.select("gen"), Err(AppError::ServiceNotAvailable(_))));
}
