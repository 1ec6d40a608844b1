//! Runtime configuration
//!
//! Every setting has a default; `TrackerConfig::from_env` overrides them from
//! `TRACKER_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Batch queue settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue length that triggers an immediate flush
    pub batch_size: usize,
    /// Period of the background flush timer
    pub flush_interval: Duration,
    /// Hard bound on queued items
    pub max_queue_size: usize,
    /// Total write attempts per item before it is dropped
    pub max_retries: u32,
    /// Wait before a failed batch goes back to the queue
    pub retry_delay: Duration,
    /// Upper bound on the final flush at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_queue_size: 10_000,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Session and user registry settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inactivity after which a session ends
    pub timeout: Duration,
    /// Period of the safety-net sweep over all sessions
    pub sweep_interval: Duration,
    /// How long an untouched user record stays in memory
    pub user_retention: Duration,
    /// Period of the user eviction sweep
    pub user_sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            user_retention: Duration::from_secs(24 * 60 * 60),
            user_sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Realtime broadcaster settings
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub enabled: bool,
    /// Period of the closed-subscriber sweep
    pub sweep_interval: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrivacyConfig {
    /// Only admit events for identities that granted analytics consent
    pub privacy_mode: bool,
}

/// Which storage adapter the server runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Jsonl,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "jsonl" | "file" => Ok(StorageBackend::Jsonl),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Jsonl,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests per IP per window; 0 disables rate limiting
    pub rate_limit: u32,
    pub rate_limit_window: Duration,
    pub blocked_ips: Vec<String>,
    /// Allowed CORS origins; empty means any
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
            rate_limit: 600,
            rate_limit_window: Duration::from_secs(60),
            blocked_ips: Vec::new(),
            cors_origins: Vec::new(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default)]
pub struct TrackerConfig {
    pub queue: QueueConfig,
    pub session: SessionConfig,
    pub realtime: RealtimeConfig,
    pub privacy: PrivacyConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

impl TrackerConfig {
    /// Defaults overridden by `TRACKER_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("TRACKER_HOST") {
            config.server.host = v;
        }
        if let Some(v) = parse_var(&lookup, "TRACKER_PORT")? {
            config.server.port = v;
        }
        if let Some(v) = parse_var(&lookup, "TRACKER_RATE_LIMIT")? {
            config.server.rate_limit = v;
        }
        if let Some(v) = lookup("TRACKER_BLOCKED_IPS") {
            config.server.blocked_ips = split_list(&v);
        }
        if let Some(v) = lookup("TRACKER_CORS_ORIGINS") {
            config.server.cors_origins = split_list(&v);
        }

        if let Some(v) = parse_var(&lookup, "TRACKER_BATCH_SIZE")? {
            config.queue.batch_size = v;
        }
        if let Some(ms) = parse_var(&lookup, "TRACKER_FLUSH_INTERVAL_MS")? {
            config.queue.flush_interval = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var(&lookup, "TRACKER_MAX_QUEUE_SIZE")? {
            config.queue.max_queue_size = v;
        }
        if let Some(v) = parse_var(&lookup, "TRACKER_MAX_RETRIES")? {
            config.queue.max_retries = v;
        }
        if let Some(ms) = parse_var(&lookup, "TRACKER_RETRY_DELAY_MS")? {
            config.queue.retry_delay = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_var(&lookup, "TRACKER_SESSION_TIMEOUT_SECS")? {
            config.session.timeout = Duration::from_secs(secs);
        }

        if let Some(v) = parse_var(&lookup, "TRACKER_REALTIME")? {
            config.realtime.enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "TRACKER_PRIVACY_MODE")? {
            config.privacy.privacy_mode = v;
        }

        if let Some(v) = parse_var(&lookup, "TRACKER_STORAGE")? {
            config.storage.backend = v;
        }
        if let Some(v) = lookup("TRACKER_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.batch_size == 0 {
            return Err(invalid("TRACKER_BATCH_SIZE", "0", "must be at least 1"));
        }
        if self.queue.max_queue_size < self.queue.batch_size {
            return Err(invalid(
                "TRACKER_MAX_QUEUE_SIZE",
                &self.queue.max_queue_size.to_string(),
                "must not be smaller than the batch size",
            ));
        }
        if self.queue.max_retries == 0 {
            return Err(invalid("TRACKER_MAX_RETRIES", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
