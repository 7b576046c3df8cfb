//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `STUDIO_*` environment variables
//! with sensible defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `STUDIO_BIND_ADDR` | `0.0.0.0:8000` | HTTP listen address |
//! | `STUDIO_CACHE_SIZE` | 1 | Max resident pipelines (1..=16) |
//! | `STUDIO_DEVICE` | `auto` | `auto`, `cpu`, `cuda` or `metal` |
//! | `STUDIO_DEVICE_INDEX` | 0 | Accelerator ordinal |
//! | `STUDIO_HALF_PRECISION` | `true` | f16 weights on accelerators |
//! | `STUDIO_SLICED_ATTENTION` | 0 | Attention slice size (0 = off) |
//! | `STUDIO_TOKENIZER_REPO` | `openai/clip-vit-base-patch32` | CLIP tokenizer repository |
//! | `STUDIO_CATALOG_URL` | `https://huggingface.co` | Model catalog base URL |
//! | `STUDIO_CATALOG_TIMEOUT` | 10 | Catalog request timeout (secs) |
//! | `STUDIO_SHUTDOWN_TIMEOUT` | 30 | Graceful shutdown timeout (secs) |
//! | `STUDIO_REQUIRE_MODEL_LOADED` | `false` | Not ready until a model is resident |
//! | `STUDIO_MAX_IN_FLIGHT` | 64 | In-flight generations that mark the service degraded |
//! | `STUDIO_LOG_FORMAT` | `json` | `json` or `pretty` |
//! | `STUDIO_LOG_LEVEL` | `info` | Filter directive (`RUST_LOG` wins) |
//! | `STUDIO_LOG_FILE` | unset | JSON log file path |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::engine::diffusion::DEFAULT_TOKENIZER_REPO;
use crate::engine::{DeviceConfig, DevicePreference, DiffusionConfig};
use crate::health::HealthConfig;
use crate::models::{HubCatalogConfig, ModelCacheConfig};
use crate::telemetry::{LogConfig, LogFormat};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const MAX_CACHE_SIZE: usize = 16;

/// An environment variable that is set but unusable.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{key}={value:?}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub bind_addr: String,
    pub cache_size: usize,
    pub device: String,
    pub device_index: usize,
    pub half_precision: bool,
    pub sliced_attention: usize,
    pub tokenizer_repo: String,
    pub catalog_url: String,
    pub catalog_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub require_model_loaded: bool,
    pub max_in_flight: u32,
    pub log_format: String,
    pub log_level: String,
    pub log_file: Option<String>,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub bind_addr: SocketAddr,
    pub cache: ModelCacheConfig,
    pub device: DeviceConfig,
    pub diffusion: DiffusionConfig,
    pub catalog: HubCatalogConfig,
    pub shutdown_timeout: Duration,
    pub health: HealthConfig,
    pub log: LogConfig,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// Parse an env var with `FromStr`, returning `default` on missing or invalid.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool_str(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool_str(&v))
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn load_device_config() -> DeviceConfig {
    DeviceConfig {
        preference: parse_env("STUDIO_DEVICE", DevicePreference::Auto),
        index: parse_env("STUDIO_DEVICE_INDEX", 0usize),
        half_precision: parse_bool("STUDIO_HALF_PRECISION", true),
    }
}

fn load_diffusion_config(half_precision: bool) -> DiffusionConfig {
    let slice = parse_env("STUDIO_SLICED_ATTENTION", 0usize);
    DiffusionConfig {
        tokenizer_repo: non_empty("STUDIO_TOKENIZER_REPO")
            .unwrap_or_else(|| DEFAULT_TOKENIZER_REPO.to_string()),
        sliced_attention: (slice > 0).then_some(slice),
        half_precision,
    }
}

fn load_catalog_config() -> HubCatalogConfig {
    let defaults = HubCatalogConfig::default();
    let timeout_secs = parse_env("STUDIO_CATALOG_TIMEOUT", 10u64).clamp(1, 300);
    HubCatalogConfig {
        base_url: non_empty("STUDIO_CATALOG_URL").unwrap_or(defaults.base_url),
        timeout: Duration::from_secs(timeout_secs),
    }
}

fn load_health_config() -> HealthConfig {
    let defaults = HealthConfig::default();
    HealthConfig {
        require_model_loaded: parse_bool(
            "STUDIO_REQUIRE_MODEL_LOADED",
            defaults.require_model_loaded,
        ),
        max_in_flight: parse_env("STUDIO_MAX_IN_FLIGHT", defaults.max_in_flight).max(1),
    }
}

fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    LogConfig {
        format: parse_env("STUDIO_LOG_FORMAT", LogFormat::Json),
        level: non_empty("STUDIO_LOG_LEVEL").unwrap_or(defaults.level),
        output_path: non_empty("STUDIO_LOG_FILE").map(PathBuf::from),
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let device = load_device_config();
    let cache_size = parse_env("STUDIO_CACHE_SIZE", 1usize).clamp(1, MAX_CACHE_SIZE);
    let shutdown_secs = parse_env("STUDIO_SHUTDOWN_TIMEOUT", 30u64).max(1);

    EnvConfig {
        bind_addr: parse_env("STUDIO_BIND_ADDR", default_bind_addr()),
        cache: ModelCacheConfig { max_size: cache_size },
        diffusion: load_diffusion_config(device.half_precision),
        device,
        catalog: load_catalog_config(),
        shutdown_timeout: Duration::from_secs(shutdown_secs),
        health: load_health_config(),
        log: load_log_config(),
    }
}

fn check<T: FromStr>(key: &'static str, expected: &str, errors: &mut Vec<ConfigError>) {
    if let Ok(value) = std::env::var(key) {
        if value.trim().parse::<T>().is_err() {
            errors.push(ConfigError { key, value, reason: format!("expected {expected}") });
        }
    }
}

/// Report variables that are set but would be ignored by [`load`].
pub fn validate() -> Vec<ConfigError> {
    let mut errors = Vec::new();
    check::<SocketAddr>("STUDIO_BIND_ADDR", "host:port", &mut errors);
    check::<usize>("STUDIO_CACHE_SIZE", "a positive integer", &mut errors);
    check::<DevicePreference>("STUDIO_DEVICE", "auto, cpu, cuda or metal", &mut errors);
    check::<usize>("STUDIO_DEVICE_INDEX", "a non-negative integer", &mut errors);
    check::<usize>("STUDIO_SLICED_ATTENTION", "a non-negative integer", &mut errors);
    check::<u64>("STUDIO_CATALOG_TIMEOUT", "seconds", &mut errors);
    check::<u64>("STUDIO_SHUTDOWN_TIMEOUT", "seconds", &mut errors);
    check::<u32>("STUDIO_MAX_IN_FLIGHT", "a positive integer", &mut errors);
    check::<LogFormat>("STUDIO_LOG_FORMAT", "json or pretty", &mut errors);

    for key in ["STUDIO_HALF_PRECISION", "STUDIO_REQUIRE_MODEL_LOADED"] {
        if let Ok(value) = std::env::var(key) {
            if parse_bool_str(&value).is_none() {
                errors.push(ConfigError {
                    key,
                    value,
                    reason: "expected true or false".to_string(),
                });
            }
        }
    }
    if let Ok(value) = std::env::var("STUDIO_CACHE_SIZE") {
        if let Ok(n) = value.trim().parse::<usize>() {
            if n == 0 || n > MAX_CACHE_SIZE {
                errors.push(ConfigError {
                    key: "STUDIO_CACHE_SIZE",
                    value,
                    reason: format!("clamped to [1, {MAX_CACHE_SIZE}]"),
                });
            }
        }
    }
    if let Ok(value) = std::env::var("STUDIO_CATALOG_URL") {
        if !(value.starts_with("http://") || value.starts_with("https://")) {
            errors.push(ConfigError {
                key: "STUDIO_CATALOG_URL",
                value,
                reason: "expected an http(s) URL".to_string(),
            });
        }
    }
    errors
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            bind_addr: self.bind_addr.to_string(),
            cache_size: self.cache.max_size,
            device: self.device.preference.to_string(),
            device_index: self.device.index,
            half_precision: self.device.half_precision,
            sliced_attention: self.diffusion.sliced_attention.unwrap_or(0),
            tokenizer_repo: self.diffusion.tokenizer_repo.clone(),
            catalog_url: self.catalog.base_url.clone(),
            catalog_timeout_secs: self.catalog.timeout.as_secs(),
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            require_model_loaded: self.health.require_model_loaded,
            max_in_flight: self.health.max_in_flight,
            log_format: self.log.format.to_string(),
            log_level: self.log.level.clone(),
            log_file: self
                .log
                .output_path
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }
}

/// Serializes env-mutating tests across modules.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) const ENV_KEYS: &[&str] = &[
    "STUDIO_BIND_ADDR",
    "STUDIO_CACHE_SIZE",
    "STUDIO_DEVICE",
    "STUDIO_DEVICE_INDEX",
    "STUDIO_HALF_PRECISION",
    "STUDIO_SLICED_ATTENTION",
    "STUDIO_TOKENIZER_REPO",
    "STUDIO_CATALOG_URL",
    "STUDIO_CATALOG_TIMEOUT",
    "STUDIO_SHUTDOWN_TIMEOUT",
    "STUDIO_REQUIRE_MODEL_LOADED",
    "STUDIO_MAX_IN_FLIGHT",
    "STUDIO_LOG_FORMAT",
    "STUDIO_LOG_LEVEL",
    "STUDIO_LOG_FILE",
];

#[cfg(test)]
pub(crate) fn clear_env_vars() {
    for k in ENV_KEYS {
        std::env::remove_var(k);
    }
}
