//! # Runtime Configuration
//!
//! Configuration is resolved once at startup from a TOML file, environment
//! variables, or both (environment wins).
//!
//! ## Environment Variables
//!
//! - `CONDUIT_CONFIG_FILE` - TOML file loaded before the variables below
//! - `CONDUIT_MODE` - `in_process` (default) or `distributed`
//! - `CONDUIT_SERVICE_ENDPOINTS` - Static endpoints, `name=url,name=url`
//! - `CONDUIT_HEALTH_INTERVAL_SECS` - Health probe interval (default: 30)
//! - `CONDUIT_HEALTH_TIMEOUT_SECS` - Per-probe timeout (default: 5)
//! - `CONDUIT_POOL_MIN_SIZE` - Connections kept per endpoint (default: 1)
//! - `CONDUIT_POOL_MAX_SIZE` - Connection cap per endpoint (default: 10)
//! - `CONDUIT_BREAKER_FAILURE_THRESHOLD` - Failures that open a circuit (default: 5)
//! - `CONDUIT_BREAKER_RECOVERY_SECS` - Open time before a probe call (default: 30)
//! - `CONDUIT_CALL_TIMEOUT_SECS` - Per-call network timeout (default: 30)
//!
//! ## File Format
//!
//! ```toml
//! mode = "distributed"
//! call_timeout_secs = 10
//!
//! [discovery]
//! interval_secs = 15
//!
//! [discovery.endpoints]
//! memory = "http://memory:8001"
//!
//! [pool]
//! max_size = 4
//!
//! [breaker]
//! failure_threshold = 3
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fmt, time::Duration};

use conduit_net::{BreakerConfig, DiscoveryConfig, NetworkConfig, PoolConfig};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Where services run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Every service shares this process; calls are direct.
    #[default]
    InProcess,
    /// Services run as separate processes reached over the network.
    Distributed,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentMode::InProcess => write!(f, "in_process"),
            DeploymentMode::Distributed => write!(f, "distributed"),
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in_process" | "in-process" | "inprocess" | "local" => Ok(DeploymentMode::InProcess),
            "distributed" | "network" | "remote" => Ok(DeploymentMode::Distributed),
            other => Err(format!(
                "unknown deployment mode '{other}', expected in_process or distributed"
            )),
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub mode: DeploymentMode,
    pub discovery: DiscoveryConfig,
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    pub call_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let network = NetworkConfig::default();
        Self {
            mode: DeploymentMode::default(),
            discovery: network.discovery,
            pool: network.pool,
            breaker: network.breaker,
            call_timeout: network.call_timeout,
        }
    }
}

impl RuntimeConfig {
    /// Settings handed to the network client.
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            discovery: self.discovery.clone(),
            pool: self.pool,
            breaker: self.breaker,
            call_timeout: self.call_timeout,
        }
    }
}

// ============================================================================
// File representation
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    mode: Option<DeploymentMode>,
    call_timeout_secs: Option<u64>,
    discovery: FileDiscovery,
    pool: FilePool,
    breaker: FileBreaker,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileDiscovery {
    interval_secs: Option<u64>,
    timeout_secs: Option<u64>,
    endpoints: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FilePool {
    min_size: Option<usize>,
    max_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileBreaker {
    failure_threshold: Option<u32>,
    recovery_secs: Option<u64>,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`RuntimeConfig`] with file and environment variable support
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the file
    /// named by `CONDUIT_CONFIG_FILE` cannot be loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        let builder = match get_env_string("CONDUIT_CONFIG_FILE") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        builder.apply_env()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        let mut builder = Self::default();

        if let Some(mode) = file.mode {
            builder = builder.mode(mode);
        }
        if let Some(secs) = file.call_timeout_secs {
            builder = builder.call_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = file.discovery.interval_secs {
            builder = builder.probe_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = file.discovery.timeout_secs {
            builder = builder.probe_timeout(Duration::from_secs(secs));
        }
        for (service, endpoint) in file.discovery.endpoints {
            builder = builder.endpoint(service, endpoint);
        }
        if let Some(min) = file.pool.min_size {
            builder.config.pool.min_size = min;
        }
        if let Some(max) = file.pool.max_size {
            builder.config.pool.max_size = max;
        }
        if let Some(threshold) = file.breaker.failure_threshold {
            builder.config.breaker.failure_threshold = threshold;
        }
        if let Some(secs) = file.breaker.recovery_secs {
            builder.config.breaker.recovery_timeout = Duration::from_secs(secs);
        }

        Ok(builder)
    }

    /// Override the current values with any `CONDUIT_*` variables that are set.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(mode) = get_env_string("CONDUIT_MODE") {
            let mode = mode.parse().map_err(|message| ConfigError::InvalidEnvVar {
                key: "CONDUIT_MODE".to_string(),
                message,
            })?;
            self = self.mode(mode);
        }
        if let Some(raw) = get_env_string("CONDUIT_SERVICE_ENDPOINTS") {
            for (service, endpoint) in parse_endpoints("CONDUIT_SERVICE_ENDPOINTS", &raw)? {
                self = self.endpoint(service, endpoint);
            }
        }

        // Discovery
        if let Some(secs) = get_env_u64("CONDUIT_HEALTH_INTERVAL_SECS")? {
            self = self.probe_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = get_env_u64("CONDUIT_HEALTH_TIMEOUT_SECS")? {
            self = self.probe_timeout(Duration::from_secs(secs));
        }

        // Pool
        let mut pool = self.config.pool;
        if let Some(min) = get_env_usize("CONDUIT_POOL_MIN_SIZE")? {
            pool.min_size = min;
        }
        if let Some(max) = get_env_usize("CONDUIT_POOL_MAX_SIZE")? {
            pool.max_size = max;
        }
        self = self.pool(pool);

        // Circuit breaker
        let mut breaker = self.config.breaker;
        if let Some(threshold) = get_env_u32("CONDUIT_BREAKER_FAILURE_THRESHOLD")? {
            breaker.failure_threshold = threshold;
        }
        if let Some(secs) = get_env_u64("CONDUIT_BREAKER_RECOVERY_SECS")? {
            breaker.recovery_timeout = Duration::from_secs(secs);
        }
        self = self.breaker(breaker);

        if let Some(secs) = get_env_u64("CONDUIT_CALL_TIMEOUT_SECS")? {
            self = self.call_timeout(Duration::from_secs(secs));
        }

        Ok(self)
    }

    #[must_use]
    pub fn mode(mut self, mode: DeploymentMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Add or replace a static service endpoint.
    #[must_use]
    pub fn endpoint(mut self, service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.config
            .discovery
            .endpoints
            .insert(service.into(), endpoint.into());
        self
    }

    #[must_use]
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.config.discovery.probe_interval = interval;
        self
    }

    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.discovery.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    #[must_use]
    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Validate configuration and build [`RuntimeConfig`]
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.config;
        let invalid = |message: &str| Err(ConfigError::ValidationError(message.to_string()));

        if c.discovery.probe_interval.is_zero() {
            return invalid("discovery.probe_interval must be greater than 0");
        }
        if c.discovery.probe_timeout.is_zero() {
            return invalid("discovery.probe_timeout must be greater than 0");
        }
        if c.call_timeout.is_zero() {
            return invalid("call_timeout must be greater than 0");
        }
        if c.pool.max_size == 0 {
            return invalid("pool.max_size must be greater than 0");
        }
        if c.pool.min_size > c.pool.max_size {
            return invalid("pool.min_size must be <= pool.max_size");
        }
        if c.breaker.failure_threshold == 0 {
            return invalid("breaker.failure_threshold must be at least 1");
        }

        for (service, endpoint) in &c.discovery.endpoints {
            if service.trim().is_empty() {
                return invalid("service endpoint names cannot be empty");
            }
            match url::Url::parse(endpoint) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    return Err(ConfigError::ValidationError(format!(
                        "endpoint for '{service}' must use http or https, got '{}'",
                        url.scheme()
                    )));
                }
                Err(e) => {
                    return Err(ConfigError::ValidationError(format!(
                        "invalid endpoint for '{service}': '{endpoint}' ({e})"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Parse `name=url,name=url`.
fn parse_endpoints(key: &str, raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(name, url)| (name.trim().to_string(), url.trim().to_string()))
                .ok_or_else(|| ConfigError::InvalidEnvVar {
                    key: key.to_string(),
                    message: format!("expected name=url, got '{entry}'"),
                })
        })
        .collect()
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u64 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u32>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u32 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid usize value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}
