//! Configuration module

pub mod settings;

pub use settings::{
    BroadcastConfig, HealthCheckConfig, LoadBalancerConfig, LoggingConfig, ProxyConfig,
    ServerConfig, Settings, ShutdownConfig,
};
