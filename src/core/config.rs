//! Application configuration loaded from JSON files and environment variables.
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use envconfig::Envconfig;
use humantime::Duration;
use reqwest::Url;
use serde_json::Value;

use crate::ingest::RetryPolicy;
use crate::services::HistorySettings;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Optional JSON files read from the working directory, in increasing precedence.
pub const CONFIG_FILES: [&str; 2] = ["appsettings.json", "connections.json"];

/// Longest accepted backfill window.
pub const MAX_HISTORY_WINDOW: TimeDelta = TimeDelta::days(100 * 365);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read configuration file {0}: {1}")]
    FileReadError(PathBuf, #[source] std::io::Error),
    #[error("Invalid JSON in configuration file {0}: {1}")]
    FileJsonError(PathBuf, #[source] serde_json::Error),
    #[error("Configuration file {0} must contain a JSON object")]
    FileNotObject(PathBuf),
    #[error("Configuration error: {0}")]
    EnvError(#[from] envconfig::Error),
    #[error("Invalid history settings: {0}")]
    HistoryError(String),
    #[error("Invalid realtime settings: {0}")]
    RealtimeError(String),
}

#[derive(Envconfig, Debug)]
pub struct Config {
    #[allow(dead_code)]
    #[envconfig(from = "APP_LOG", default = "error")]
    pub app_log: String,
    #[allow(dead_code)]
    #[envconfig(from = "APP_LOG_STYLE", default = "always")]
    pub app_log_style: String,
    #[envconfig(from = "AMBIENT_URL", default = "https://rt.ambientweather.net/")]
    pub ambient_url: Url,
    #[envconfig(from = "AMBIENT_API_KEY")]
    pub ambient_api_key: String,
    #[envconfig(from = "AMBIENT_APPLICATION_KEY")]
    pub ambient_application_key: String,
    #[envconfig(from = "AMBIENT_MAC_ADDRESS")]
    pub ambient_mac_address: String,
    #[envconfig(from = "REALTIME_ENABLED", default = "false")]
    pub realtime_enabled: bool,
    #[envconfig(from = "REALTIME_POLL_INTERVAL", default = "60s")]
    pub realtime_poll_interval: Duration,
    #[envconfig(from = "HISTORY_ENABLED", default = "true")]
    pub history_enabled: bool,
    #[envconfig(from = "HISTORY_WINDOW", default = "30days")]
    pub history_window: Duration,
    #[envconfig(from = "HISTORY_PAGE_SPAN", default = "1day")]
    pub history_page_span: Duration,
    #[envconfig(from = "HISTORY_PAGE_LIMIT", default = "288")]
    pub history_page_limit: u32,
    #[envconfig(from = "HISTORY_MAX_ATTEMPTS", default = "3")]
    pub history_max_attempts: u32,
    #[envconfig(from = "HISTORY_BASE_DELAY", default = "1s")]
    pub history_base_delay: Duration,
    #[envconfig(from = "HISTORY_MAX_DELAY", default = "30s")]
    pub history_max_delay: Duration,
    #[envconfig(from = "HISTORY_FETCH_TIMEOUT", default = "10s")]
    pub history_fetch_timeout: Duration,
    #[envconfig(from = "HISTORY_CONCURRENCY", default = "1")]
    pub history_concurrency: usize,
}

impl Config {
    /// Load the configuration from the given JSON files, then the environment.
    /// Missing files are skipped. Later files override earlier ones and the
    /// environment overrides every file.
    pub fn load<P: AsRef<Path>>(files: &[P]) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for file in files {
            read_json_file(file.as_ref(), &mut values)?;
        }
        values.extend(env::vars());
        let config = Config::init_from_hashmap(&values)?;
        config.history_settings()?;
        config.realtime_poll_interval()?;
        Ok(config)
    }

    /// Interval between realtime polls, must be positive.
    pub fn realtime_poll_interval(&self) -> Result<std::time::Duration, ConfigError> {
        let interval: std::time::Duration = self.realtime_poll_interval.into();
        if interval.is_zero() {
            return Err(ConfigError::RealtimeError(
                "REALTIME_POLL_INTERVAL must be positive".to_string(),
            ));
        }
        Ok(interval)
    }

    /// Build the history backfill settings.
    pub fn history_settings(&self) -> Result<HistorySettings, ConfigError> {
        let retry_policy = RetryPolicy::new(
            self.history_max_attempts,
            self.history_base_delay.into(),
            self.history_max_delay.into(),
        )
        .map_err(|e| ConfigError::HistoryError(e.to_string()))?;
        let page_span = to_time_delta("HISTORY_PAGE_SPAN", self.history_page_span)?;
        if page_span.is_zero() {
            return Err(ConfigError::HistoryError(
                "HISTORY_PAGE_SPAN must be positive".to_string(),
            ));
        }
        let window = to_time_delta("HISTORY_WINDOW", self.history_window)?;
        if window > MAX_HISTORY_WINDOW {
            return Err(ConfigError::HistoryError(format!(
                "HISTORY_WINDOW must not exceed {} days",
                MAX_HISTORY_WINDOW.num_days()
            )));
        }
        Ok(HistorySettings {
            window,
            page_span,
            page_limit: self.history_page_limit,
            retry_policy,
            fetch_timeout: self.history_fetch_timeout.into(),
            concurrency: self.history_concurrency.max(1),
        })
    }
}

fn to_time_delta(name: &str, duration: Duration) -> Result<TimeDelta, ConfigError> {
    TimeDelta::from_std(duration.into())
        .map_err(|e| ConfigError::HistoryError(format!("{name} out of range: {e}")))
}

/// Merge the top-level scalar entries of a JSON object file into `values`.
fn read_json_file(path: &Path, values: &mut HashMap<String, String>) -> Result<(), ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("Configuration file {} not found, skipping", path.display());
            return Ok(());
        }
        Err(e) => return Err(ConfigError::FileReadError(path.to_path_buf(), e)),
    };
    let json: Value = serde_json::from_str(&content)
        .map_err(|e| ConfigError::FileJsonError(path.to_path_buf(), e))?;
    let Value::Object(entries) = json else {
        return Err(ConfigError::FileNotObject(path.to_path_buf()));
    };
    for (key, value) in entries {
        match value {
            Value::String(s) => {
                values.insert(key, s);
            }
            Value::Number(n) => {
                values.insert(key, n.to_string());
            }
            Value::Bool(b) => {
                values.insert(key, b.to_string());
            }
            Value::Null | Value::Array(_) | Value::Object(_) => {
                log::debug!("Ignoring non-scalar key '{key}' in {}", path.display());
            }
        }
    }
    Ok(())
}

/// Mask a secret for logging, keeping only its last 4 characters.
pub fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{tail}", "*".repeat(count - 4))
}

pub fn configure_logger() {
    let env = env_logger::Env::default()
        .filter_or("APP_LOG", "info")
        .write_style_or("APP_LOG_STYLE", "always");
    env_logger::init_from_env(env);
}
