//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Provider keys never live in the TOML: the file only names a keys file,
//! which `KEYS_FILE` overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use key_pool::{PoolConfig, Quota, RetryPolicy};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub retry: RetrySection,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Deadline for one generation request, all retries included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Upstream image API settings
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-call client timeout.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

/// Credential pool settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub keys_file: Option<PathBuf>,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    /// Process-wide ceiling on concurrent provider calls.
    pub max_in_flight: usize,
    pub failure_threshold: u32,
    pub failure_cooldown_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            keys_file: None,
            requests_per_minute: key_pool::limiter::DEFAULT_REQUESTS_PER_MINUTE,
            requests_per_day: key_pool::limiter::DEFAULT_REQUESTS_PER_DAY,
            max_in_flight: 64,
            failure_threshold: key_pool::pool::DEFAULT_FAILURE_THRESHOLD,
            failure_cooldown_secs: key_pool::pool::DEFAULT_FAILURE_COOLDOWN.as_secs(),
        }
    }
}

/// Subunit retry settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_scheduling_passes: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            max_scheduling_passes: 3,
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_request_timeout() -> u64 {
    180
}

fn default_base_url() -> String {
    "https://api.siliconflow.cn".to_string()
}

fn default_provider_timeout() -> u64 {
    120
}

fn nonzero(value: u64, name: &str) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Config(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Keys file resolution order:
    /// 1. KEYS_FILE env var
    /// 2. pool.keys_file from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.provider.base_url.starts_with("http://")
            && !config.provider.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.provider.base_url
            )));
        }

        nonzero(config.server.max_connections as u64, "max_connections")?;
        nonzero(config.server.request_timeout_secs, "request_timeout_secs")?;
        nonzero(config.provider.timeout_secs, "timeout_secs")?;
        nonzero(config.pool.requests_per_minute.into(), "requests_per_minute")?;
        nonzero(config.pool.requests_per_day.into(), "requests_per_day")?;
        nonzero(config.pool.max_in_flight as u64, "max_in_flight")?;
        nonzero(config.pool.failure_threshold.into(), "failure_threshold")?;
        nonzero(config.retry.max_attempts.into(), "max_attempts")?;
        nonzero(config.retry.max_scheduling_passes.into(), "max_scheduling_passes")?;

        if config.retry.max_delay_ms < config.retry.base_delay_ms {
            return Err(common::Error::Config(
                "max_delay_ms must not be less than base_delay_ms".into(),
            ));
        }

        if let Ok(path) = std::env::var("KEYS_FILE") {
            config.pool.keys_file = Some(PathBuf::from(path));
        }
        if config.pool.keys_file.is_none() {
            return Err(common::Error::Config(
                "no keys file: set pool.keys_file or KEYS_FILE".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("image-gateway.toml")
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            quota: Quota {
                per_minute: self.pool.requests_per_minute,
                per_day: self.pool.requests_per_day,
                ..Quota::default()
            },
            failure_threshold: self.pool.failure_threshold,
            failure_cooldown: Duration::from_secs(self.pool.failure_cooldown_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            max_scheduling_passes: self.retry.max_scheduling_passes,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }
}

/// Read provider keys: one per line, trimmed, blank lines skipped.
pub fn load_keys(path: &Path) -> common::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Keys(format!("failed to read {}: {e}", path.display()))
    })?;

    let keys: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();

    if keys.is_empty() {
        return Err(common::Error::Keys(format!(
            "{} contains no keys",
            path.display()
        )));
    }
    Ok(keys)
}
