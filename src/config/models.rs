// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("At least one backend must be configured")]
    NoBackends,

    #[error("Backend URL has no host: {0}")]
    MissingHost(Url),

    #[error("Invalid listen address {0}")]
    InvalidListenAddr(String),

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Ordered backend list. Order defines the rotation order.
    #[serde(default)]
    pub backends: Vec<Url>,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backends: Vec::new(),
            health_check: HealthCheckConfig::default(),
            retry: RetryConfig::default(),
            proxy: ProxyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        if let Some(url) = self.backends.iter().find(|u| u.host_str().is_none()) {
            return Err(ConfigError::MissingHost(url.clone()));
        }

        self.server.listen_addr()?;

        if self.health_check.interval_secs == 0 {
            return Err(ConfigError::ZeroValue("health_check.interval_secs"));
        }
        if self.health_check.dial_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("health_check.dial_timeout_secs"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroValue("retry.max_attempts"));
        }
        if self.proxy.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("proxy.request_timeout_secs"));
        }
        if self.proxy.max_body_bytes == 0 {
            return Err(ConfigError::ZeroValue("proxy.max_body_bytes"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
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

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidListenAddr(raw))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// How often every backend is re-probed.
    #[serde(default = "default_check_interval")]
    pub interval_secs: u64,
    /// Max wait for a single TCP dial.
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_check_interval(),
            dial_timeout_secs: default_dial_timeout(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Largest request body buffered for forwarding; bigger ones get a 413.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ProxyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_check_interval() -> u64 {
    120
}

fn default_dial_timeout() -> u64 {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    10
}

fn default_backoff_max() -> u64 {
    100
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
