//! Runtime configuration for the telemetry core
//!
//! Every option is optional with a stated default; the environment is read
//! once at process start and the resolved values are passed by reference
//! from then on.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::logger::LogLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    pub log_level: LogLevel,
    pub log_dir: PathBuf,
    pub data_dir: PathBuf,
    pub retention_days: u64,
    pub console_enabled: bool,
    pub production: bool,
    /// Fallback slow-request threshold for paths without a dedicated entry.
    pub perf_threshold_api_ms: u64,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: usize,
    pub listen_addr: String,
}

impl TelemetryConfig {
    /// Resolve configuration from the environment. Missing or unparsable
    /// values fall back to their defaults.
    pub fn from_env() -> Self {
        let production = std::env::var("APP_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        let default_level = if production {
            LogLevel::Info
        } else {
            LogLevel::Debug
        };

        Self {
            log_level: env_parse("LOG_LEVEL", default_level),
            log_dir: PathBuf::from(env_or("LOG_DIR", "logs")),
            data_dir: PathBuf::from(env_or("DATA_DIR", "data")),
            retention_days: env_parse("LOG_RETENTION_DAYS", 30),
            console_enabled: std::env::var("ENABLE_CONSOLE_LOG")
                .map(|v| v != "false")
                .unwrap_or(true),
            production,
            perf_threshold_api_ms: env_parse("PERF_THRESHOLD_API", 1000),
            rate_limit_window_ms: env_parse("RATE_LIMIT_WINDOW_MS", 60_000),
            rate_limit_max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", 100),
            listen_addr: env_or("LISTEN_ADDR", "0.0.0.0:3000"),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Debug,
            log_dir: PathBuf::from("logs"),
            data_dir: PathBuf::from("data"),
            retention_days: 30,
            console_enabled: true,
            production: false,
            perf_threshold_api_ms: 1000,
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 100,
            listen_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
