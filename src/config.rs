//! Configuration management for Windowguard.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WindowGuardError};
use crate::ratelimit::{FailurePolicy, RateLimiterConfig, ReaperSettings};

/// Prefix for environment overrides, e.g. `WINDOWGUARD__RATE_LIMITING__MAX_EVENTS=10`.
const ENV_PREFIX: &str = "WINDOWGUARD";

/// Main configuration for the Windowguard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Public HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Admin listen address, kept off the public listener
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            admin_addr: default_admin_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8001))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum admitted requests per client per window
    #[serde(default = "default_max_events")]
    pub max_events: u32,

    /// Rolling window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,

    /// HTTP methods subject to the limit
    #[serde(default = "default_protected_methods")]
    pub protected_methods: Vec<String>,

    /// Requests whose path contains this fragment are limited
    #[serde(default = "default_protected_path_fragment")]
    pub protected_path_fragment: String,

    /// Behaviour when the backend cannot answer
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Backend call timeout in milliseconds
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_ms: u64,

    /// Dormant key reaper
    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            window_seconds: default_window_seconds(),
            protected_methods: default_protected_methods(),
            protected_path_fragment: default_protected_path_fragment(),
            failure_policy: FailurePolicy::default(),
            backend_timeout_ms: default_backend_timeout(),
            reaper: ReaperConfig::default(),
        }
    }
}

fn default_max_events() -> u32 {
    5
}

fn default_window_seconds() -> f64 {
    60.0
}

fn default_protected_methods() -> Vec<String> {
    vec!["POST".to_string()]
}

fn default_protected_path_fragment() -> String {
    "/messages".to_string()
}

fn default_backend_timeout() -> u64 {
    50
}

impl RateLimitingConfig {
    /// Validate the limits into a limiter configuration.
    pub fn limiter_config(&self) -> Result<RateLimiterConfig> {
        RateLimiterConfig::new(self.max_events, self.window_seconds)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

/// Reaper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Whether the reaper runs at all
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,

    /// Sweep interval in seconds
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,

    /// Idle time in seconds after which a key may be removed
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            interval_secs: default_reaper_interval(),
            retention_secs: default_retention(),
        }
    }
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_retention() -> u64 {
    600
}

impl ReaperConfig {
    pub fn settings(&self) -> ReaperSettings {
        ReaperSettings {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            retention_seconds: self.retention_secs as f64,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WindowGuardError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional YAML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| WindowGuardError::Config(format!("Failed to build configuration: {}", e)))?;

        config
            .try_deserialize()
            .map_err(|e| WindowGuardError::Config(format!("Failed to deserialize configuration: {}", e)))
    }
}
