use crate::publisher::PublisherConfig;
use crate::reliability::{CircuitConfig, HealthConfig, ResumeConfig, RetryPolicy, SpoolConfig};
use crate::sender::ClientConfig;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("file error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Process-wide configuration, constructed once at startup and injected
/// into each component. No ambient static state.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[command(author, version, about = "Audit event capture-and-forward pipeline", long_about = None)]
pub struct Config {
    /// Collector base URL (ingestion and liveness paths derive from it)
    #[arg(long, env = "COLLECTOR_URL", default_value = "http://localhost:8000")]
    pub collector_url: String,

    /// API key sent as X-API-Key on every request
    #[arg(long, env = "COLLECTOR_API_KEY")]
    pub api_key: Option<String>,

    /// In-memory queue capacity
    #[arg(long, env = "QUEUE_CAPACITY", default_value = "1000")]
    pub queue_capacity: usize,

    /// Events per delivery batch (defaults to the queue capacity, capped at
    /// the collector's 1000-event limit)
    #[arg(long, env = "BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Flush interval in seconds
    #[arg(long, env = "FLUSH_INTERVAL_SECS", default_value = "10")]
    pub flush_interval_secs: u64,

    /// Health check interval in seconds
    #[arg(long, env = "HEALTH_INTERVAL_SECS", default_value = "30")]
    pub health_interval_secs: u64,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Delivery attempts per batch before spooling
    #[arg(long, env = "RETRY_ATTEMPTS", default_value = "3")]
    pub retry_attempts: u32,

    /// Initial retry backoff in milliseconds
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "2000")]
    pub retry_base_delay_ms: u64,

    /// Active spool file path
    #[arg(long, env = "SPOOL_PATH", default_value = "spool/audit-events.ndjson")]
    pub spool_path: PathBuf,

    /// Spool rotation threshold in megabytes
    #[arg(long, env = "SPOOL_MAX_FILE_MB", default_value = "50")]
    pub spool_max_file_mb: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Optional TOML configuration file; when set, the file replaces all
    /// other flags and environment variables wholesale
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub flush_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub health_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collector_url: "http://localhost:8000".to_string(),
            api_key: None,
            queue_capacity: 1000,
            batch_size: None,
            flush_interval_secs: 10,
            health_interval_secs: 30,
            request_timeout_secs: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 2000,
            spool_path: PathBuf::from("spool/audit-events.ndjson"),
            spool_max_file_mb: 50,
            log_level: LogLevel::Info,
            config_file: None,
            flush_interval: Duration::from_secs(10),
            health_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Parses CLI arguments (with env-var fallbacks). A `--config-file`
    /// flag switches the source entirely: the file's values are used and
    /// other CLI/env settings are ignored.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        if let Some(path) = config.config_file.clone() {
            config = Self::from_file(&path)?;
        }
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process();
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) {
        self.flush_interval = Duration::from_secs(self.flush_interval_secs);
        self.health_interval = Duration::from_secs(self.health_interval_secs);
        self.request_timeout = Duration::from_secs(self.request_timeout_secs);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue capacity must be positive".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry attempts must be positive".to_string(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "flush interval must be positive".to_string(),
            ));
        }
        if self.spool_max_file_mb == 0 {
            return Err(ConfigError::InvalidConfig(
                "spool max file size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        // Guarantee a trailing slash so path joins append instead of replace.
        let raw = if self.collector_url.ends_with('/') {
            self.collector_url.clone()
        } else {
            format!("{}/", self.collector_url)
        };
        Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", self.collector_url)))
    }

    /// Events per delivery batch: explicit setting, else the queue capacity,
    /// never above the collector's per-request limit.
    pub fn effective_batch_size(&self) -> usize {
        const COLLECTOR_BATCH_LIMIT: usize = 1000;
        self.batch_size
            .unwrap_or(self.queue_capacity)
            .clamp(1, COLLECTOR_BATCH_LIMIT)
    }

    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            base_url: self.base_url()?,
            api_key: self.api_key.clone(),
            timeout: self.request_timeout,
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("audit-forwarder/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    pub fn spool_config(&self) -> SpoolConfig {
        SpoolConfig {
            path: self.spool_path.clone(),
            max_file_size: self.spool_max_file_mb * 1024 * 1024,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig::default()
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            flush_interval: self.flush_interval,
            batch_size: self.effective_batch_size(),
        }
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            check_interval: self.health_interval,
        }
    }

    pub fn resume_config(&self) -> ResumeConfig {
        ResumeConfig::default()
    }
}
