use crate::core::{CounterError, Result};
use crate::engine::retry::{Backoff, RetryPolicy};
use crate::storage::RECORD_VERSION;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_FILENAME: &str = "counter.json";
pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o644;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_PREFIX: &str = "COUNTER_";

/// Engine configuration
///
/// Read-only once handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Counter file location
    pub path: PathBuf,

    /// Mode bits applied to the counter file (unix)
    pub permissions: u32,

    /// Physical save attempts per persist
    pub retry_attempts: u32,

    /// Base delay between save attempts
    pub retry_delay: Duration,

    pub backoff: Backoff,

    /// Background persist period
    pub persist_interval: Duration,

    /// How long a caller should wait for the shutdown flush
    pub shutdown_flush_timeout: Duration,

    /// Format tag written into records
    pub record_version: String,

    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FILENAME)
    }
}

impl EngineConfig {
    /// Create a configuration for `path` with default settings
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            permissions: DEFAULT_FILE_PERMISSIONS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            backoff: Backoff::Fixed,
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            shutdown_flush_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            record_version: RECORD_VERSION.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = mode;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }

    pub fn shutdown_flush_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_flush_timeout = timeout;
        self
    }

    pub fn record_version(mut self, version: &str) -> Self {
        self.record_version = version.to_string();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.log_level = level.to_string();
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            delay: self.retry_delay,
            backoff: self.backoff,
        }
    }

    /// Load settings from a JSON file on top of the defaults
    ///
    /// Every key is optional:
    ///
    /// ```json
    /// { "filename": "data/counter.json", "file_permissions": "0600", "persist_interval_ms": 30000 }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        let file: FileConfig = serde_json::from_slice(&raw).map_err(|e| {
            CounterError::InvalidConfig(format!("Failed to parse config '{}': {}", path.display(), e))
        })?;
        let mut config = Self::default();
        file.apply(&mut config)?;
        Ok(config)
    }

    /// Apply `COUNTER_*` overrides from the process environment,
    /// loading `./.env` into it first when present
    pub fn apply_env(self) -> Result<Self> {
        dotenvy::dotenv().ok();
        self.apply_env_from(std::env::vars())
    }

    /// Apply `COUNTER_*` overrides from a dotenv file without touching the
    /// process environment
    pub fn apply_env_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let vars = dotenvy::from_path_iter(path)
            .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
            .map_err(|e| {
                CounterError::InvalidConfig(format!("Failed to read env file '{}': {}", path.display(), e))
            })?;
        self.apply_env_from(vars)
    }

    /// Apply `COUNTER_*` overrides from an explicit variable list
    pub fn apply_env_from<I, K, V>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "FILENAME" => self.path = PathBuf::from(value),
                "FILE_PERMISSIONS" => self.permissions = parse_mode(key.as_ref(), value)?,
                "SAVE_RETRY_ATTEMPTS" => self.retry_attempts = parse_number(key.as_ref(), value)?,
                "SAVE_RETRY_DELAY_MS" => self.retry_delay = parse_millis(key.as_ref(), value)?,
                "PERSIST_INTERVAL_MS" => self.persist_interval = parse_millis(key.as_ref(), value)?,
                "SHUTDOWN_TIMEOUT_MS" => self.shutdown_flush_timeout = parse_millis(key.as_ref(), value)?,
                "LOG_LEVEL" => self.log_level = value.to_string(),
                _ => {}
            }
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(CounterError::InvalidConfig("counter file path is empty".into()));
        }
        if self.path.file_name().is_none() {
            return Err(CounterError::InvalidConfig(format!(
                "counter file path '{}' has no file name",
                self.path.display()
            )));
        }
        if self.retry_attempts == 0 {
            return Err(CounterError::InvalidConfig("retry_attempts must be at least 1".into()));
        }
        if self.persist_interval.is_zero() {
            return Err(CounterError::InvalidConfig("persist_interval must be non-zero".into()));
        }
        if self.permissions > 0o7777 {
            return Err(CounterError::InvalidConfig(format!(
                "file permissions {:o} out of range",
                self.permissions
            )));
        }
        Ok(())
    }

    /// Create the directory holding the counter file if it is missing
    pub fn ensure_data_dir(&self) -> Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CounterError::InvalidConfig(format!(
                        "Failed to create data directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    filename: Option<PathBuf>,
    file_permissions: Option<String>,
    save_retry_attempts: Option<u32>,
    save_retry_delay_ms: Option<u64>,
    persist_interval_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
    log_level: Option<String>,
}

impl FileConfig {
    fn apply(self, config: &mut EngineConfig) -> Result<()> {
        if let Some(filename) = self.filename {
            config.path = filename;
        }
        if let Some(mode) = self.file_permissions {
            config.permissions = parse_mode("file_permissions", &mode)?;
        }
        if let Some(attempts) = self.save_retry_attempts {
            config.retry_attempts = attempts;
        }
        if let Some(ms) = self.save_retry_delay_ms {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.persist_interval_ms {
            config.persist_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.shutdown_flush_timeout = Duration::from_millis(ms);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        Ok(())
    }
}

fn parse_mode(key: &str, value: &str) -> Result<u32> {
    u32::from_str_radix(value.trim_start_matches("0o"), 8)
        .map_err(|e| CounterError::InvalidConfig(format!("{key}: invalid octal mode '{value}': {e}")))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CounterError::InvalidConfig(format!("{key}: invalid number '{value}': {e}")))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}
