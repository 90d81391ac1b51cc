use crate::error::ConfigError;
use serde::Deserialize;
use std::path::PathBuf;

/// Full service configuration, with every field the core consumes.
///
/// Resolution order, lowest to highest precedence: built-in defaults, TOML
/// file (if `--config` is given), `INGESTD_*` environment variables, CLI
/// flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// Fixed worker count for the ingestion thread pool.
    pub workers: usize,
    /// Bounded task queue capacity for the thread pool.
    pub pool_queue_capacity: usize,
    /// Bounded durable-writer queue capacity.
    pub writer_queue_capacity: usize,
    /// Requests allowed per client per 1s window.
    pub rate_limit: u32,
    /// Stripe pool size backing the rate limiter's per-client locks.
    pub stripe_count: usize,
    /// Per-client decision ring capacity, rounded to a power of two.
    pub ring_capacity: usize,
    /// Maximum accepted request body size, in bytes.
    pub body_cap_bytes: usize,
    /// Per-connection idle read/write timeout, in seconds.
    pub idle_timeout_secs: u64,
    /// Path to the append-only storage sink file.
    pub storage_path: PathBuf,
    /// How often the metrics flusher ticks, in seconds.
    pub flusher_interval_secs: u64,
    /// Bounded retry count for a failing sink append before the batch is
    /// dropped and counted.
    pub writer_retry_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            workers: 16,
            pool_queue_capacity: 10_000,
            writer_queue_capacity: 16_384,
            rate_limit: 10,
            stripe_count: 10_007,
            ring_capacity: 1024,
            body_cap_bytes: 1024 * 1024,
            idle_timeout_secs: 60,
            storage_path: PathBuf::from("ingestd.log"),
            flusher_interval_secs: 1,
            writer_retry_limit: 3,
        }
    }
}

impl Config {
    /// Loads a config starting from defaults, optionally overlaid by a TOML
    /// file, then by `INGESTD_*` environment variables.
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("INGESTD_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = env_parsed("INGESTD_WORKERS") {
            self.workers = v;
        }
        if let Some(v) = env_parsed("INGESTD_POOL_QUEUE_CAPACITY") {
            self.pool_queue_capacity = v;
        }
        if let Some(v) = env_parsed("INGESTD_WRITER_QUEUE_CAPACITY") {
            self.writer_queue_capacity = v;
        }
        if let Some(v) = env_parsed("INGESTD_RATE_LIMIT") {
            self.rate_limit = v;
        }
        if let Some(v) = env_parsed("INGESTD_STRIPE_COUNT") {
            self.stripe_count = v;
        }
        if let Some(v) = env_parsed("INGESTD_RING_CAPACITY") {
            self.ring_capacity = v;
        }
        if let Some(v) = env_parsed("INGESTD_BODY_CAP_BYTES") {
            self.body_cap_bytes = v;
        }
        if let Some(v) = env_parsed("INGESTD_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("INGESTD_STORAGE_PATH") {
            self.storage_path = PathBuf::from(v);
        }
        if let Some(v) = env_parsed("INGESTD_FLUSHER_INTERVAL_SECS") {
            self.flusher_interval_secs = v;
        }
        if let Some(v) = env_parsed("INGESTD_WRITER_RETRY_LIMIT") {
            self.writer_retry_limit = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be > 0".to_string()));
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::Invalid("rate_limit must be > 0".to_string()));
        }
        if self.stripe_count == 0 {
            return Err(ConfigError::Invalid("stripe_count must be > 0".to_string()));
        }
        if self.ring_capacity == 0 {
            return Err(ConfigError::Invalid("ring_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
