//! Configuration surface.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables; falls back to spec-mandated defaults when neither is present.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_payer_ttl_secs")]
    pub payer_secs: u64,
    #[serde(default = "default_receiver_ttl_secs")]
    pub receiver_secs: u64,
    #[serde(default = "default_blacklist_ttl_secs")]
    pub blacklist_secs: u64,
}

fn default_payer_ttl_secs() -> u64 {
    300
}
fn default_receiver_ttl_secs() -> u64 {
    600
}
fn default_blacklist_ttl_secs() -> u64 {
    30
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            payer_secs: default_payer_ttl_secs(),
            receiver_secs: default_receiver_ttl_secs(),
            blacklist_secs: default_blacklist_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    #[serde(default = "default_cache_ms")]
    pub cache_ms: u64,
    #[serde(default = "default_store_read_ms")]
    pub store_read_ms: u64,
    #[serde(default = "default_store_write_ms")]
    pub store_write_ms: u64,
    #[serde(default = "default_ml_ms")]
    pub ml_ms: u64,
    #[serde(default = "default_total_ms")]
    pub total_ms: u64,
}

fn default_cache_ms() -> u64 {
    5
}
fn default_store_read_ms() -> u64 {
    60
}
fn default_store_write_ms() -> u64 {
    80
}
fn default_ml_ms() -> u64 {
    50
}
fn default_total_ms() -> u64 {
    250
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            cache_ms: default_cache_ms(),
            store_read_ms: default_store_read_ms(),
            store_write_ms: default_store_write_ms(),
            ml_ms: default_ml_ms(),
            total_ms: default_total_ms(),
        }
    }
}

impl DeadlineConfig {
    pub fn cache(&self) -> Duration {
        Duration::from_millis(self.cache_ms)
    }
    pub fn store_read(&self) -> Duration {
        Duration::from_millis(self.store_read_ms)
    }
    pub fn store_write(&self) -> Duration {
        Duration::from_millis(self.store_write_ms)
    }
    pub fn ml(&self) -> Duration {
        Duration::from_millis(self.ml_ms)
    }
    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoConfig {
    #[serde(default = "default_supersonic_kmh")]
    pub supersonic_kmh: f64,
    #[serde(default = "default_suspicious_kmh")]
    pub suspicious_kmh: f64,
}

fn default_supersonic_kmh() -> f64 {
    900.0
}
fn default_suspicious_kmh() -> f64 {
    300.0
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            supersonic_kmh: default_supersonic_kmh(),
            suspicious_kmh: default_suspicious_kmh(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            metrics_port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_store_path() -> String {
    "payrisk.db".to_string()
}
fn default_pool_size() -> u32 {
    20
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfigToml {
    #[serde(default = "default_rl_max")]
    pub max_requests: u32,
    #[serde(default = "default_rl_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rl_burst")]
    pub burst: u32,
}

fn default_rl_max() -> u32 {
    100
}
fn default_rl_window_secs() -> u64 {
    60
}
fn default_rl_burst() -> u32 {
    20
}

impl Default for RateLimitConfigToml {
    fn default() -> Self {
        Self {
            max_requests: default_rl_max(),
            window_secs: default_rl_window_secs(),
            burst: default_rl_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cache_ttl: CacheTtlConfig,
    #[serde(default)]
    pub deadline: DeadlineConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfigToml,
    #[serde(default = "default_known_device_set_max")]
    pub known_device_set_max: usize,
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_ruleset_version")]
    pub ruleset_version: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_known_device_set_max() -> usize {
    10
}
fn default_model_path() -> String {
    String::new()
}
fn default_ruleset_version() -> String {
    "RULESET_V1".to_string()
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load from an optional TOML file, falling back to defaults on any error.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path, "failed to parse config file, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Layer environment variables over a file-or-default base.
    pub fn from_env() -> Self {
        let path = std::env::var("PAYRISK_CONFIG_PATH").unwrap_or_default();
        let mut config = if path.is_empty() {
            Self::default()
        } else {
            Self::load(&path)
        };

        if let Ok(addr) = std::env::var("PAYRISK_BIND_ADDR") {
            config.server.bind_addr = addr;
        }
        if let Ok(port) = std::env::var("PAYRISK_PORT") {
            config.server.port = port.parse().unwrap_or(config.server.port);
        }
        if let Ok(db_path) = std::env::var("PAYRISK_STORE_PATH") {
            config.store.path = db_path;
        }
        if let Ok(model_path) = std::env::var("PAYRISK_MODEL_PATH") {
            config.model_path = model_path;
        }
        if let Ok(filter) = std::env::var("PAYRISK_LOG_FILTER") {
            config.log_filter = filter;
        }

        config
    }

    /// JWT secret is deliberately not part of the serializable config; it is
    /// read straight from the environment so it never ends up in a dumped
    /// TOML file or a log line.
    pub fn jwt_secret() -> String {
        std::env::var("PAYRISK_JWT_SECRET").unwrap_or_else(|_| "dev-secret-do-not-use".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let config = AppConfig::default();
        assert_eq!(config.cache_ttl.payer_secs, 300);
        assert_eq!(config.cache_ttl.receiver_secs, 600);
        assert_eq!(config.cache_ttl.blacklist_secs, 30);
        assert_eq!(config.deadline.cache_ms, 5);
        assert_eq!(config.deadline.store_read_ms, 60);
        assert_eq!(config.deadline.store_write_ms, 80);
        assert_eq!(config.deadline.ml_ms, 50);
        assert_eq!(config.deadline.total_ms, 250);
        assert_eq!(config.geo.supersonic_kmh, 900.0);
        assert_eq!(config.geo.suspicious_kmh, 300.0);
        assert_eq!(config.known_device_set_max, 10);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_default() {
        let config = AppConfig::load("/nonexistent/path/config.toml");
        assert_eq!(config.server.port, 8080);
    }
}
