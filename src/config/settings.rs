//! Application settings and configuration management

use crate::error::{AppError, Result};
use crate::gateway::load_balancer::LoadBalancingStrategy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "MESH_GATEWAY_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Health checker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_check_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_health_check_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_check_path")]
    pub path: String,
    /// Consecutive failed probes before an instance is evicted. 0 disables eviction.
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: u32,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_check_interval(),
            timeout_ms: default_health_check_timeout(),
            path: default_health_check_path(),
            eviction_threshold: default_eviction_threshold(),
        }
    }
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_health_check_timeout() -> u64 {
    5000
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_eviction_threshold() -> u32 {
    5
}

/// Load balancer configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoadBalancerConfig {
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,
}

/// Reverse proxy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_timeout")]
    pub timeout_ms: u64,
    /// Largest inbound request body forwarded to an instance
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_proxy_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_proxy_timeout() -> u64 {
    30000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

/// Broadcast hub configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_broadcast_interval")]
    pub interval_secs: u64,
    /// Pending messages allowed per subscriber before it is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl BroadcastConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_broadcast_interval(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_broadcast_interval() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    64
}

/// Shutdown configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
        }
    }
}

fn default_grace_period() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Settings {
    /// Load settings from the configured file (if any) and environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path = path.to_str().ok_or_else(|| {
            AppError::Config(config::ConfigError::Message(format!(
                "Configuration path is not valid UTF-8: {}",
                path.display()
            )))
        })?;

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("health_check.interval_secs", default_health_check_interval() as i64)?
            .set_default("health_check.timeout_ms", default_health_check_timeout() as i64)?
            .set_default("proxy.timeout_ms", default_proxy_timeout() as i64)?
            .set_default("broadcast.interval_secs", default_broadcast_interval() as i64)?
            .add_source(File::with_name(path).required(false))
            // Override with environment variables (prefixed with MESH_GATEWAY__)
            .add_source(
                Environment::with_prefix("MESH_GATEWAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }
        if self.health_check.interval_secs == 0 {
            return Err(invalid("Health check interval must be positive"));
        }
        if self.health_check.timeout_ms == 0 {
            return Err(invalid("Health check timeout must be positive"));
        }
        if !self.health_check.path.starts_with('/') {
            return Err(invalid("Health check path must start with '/'"));
        }
        if self.proxy.timeout_ms == 0 {
            return Err(invalid("Proxy timeout must be positive"));
        }
        if self.broadcast.interval_secs == 0 {
            return Err(invalid("Broadcast interval must be positive"));
        }
        if self.broadcast.queue_capacity == 0 {
            return Err(invalid("Broadcast queue capacity must be positive"));
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(invalid(&format!(
                "Invalid log format '{}'. Must be 'json' or 'pretty'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            health_check: HealthCheckConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            proxy: ProxyConfig::default(),
            broadcast: BroadcastConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
