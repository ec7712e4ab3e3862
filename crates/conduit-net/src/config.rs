//! Settings for discovery, pooling, circuit breaking and remote calls.

use std::collections::BTreeMap;
use std::time::Duration;

/// Default interval between health-probe rounds.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
/// Default timeout for a single health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Default per-call network timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Static service name to endpoint URL bootstrap mapping
    pub endpoints: BTreeMap<String, String>,
    /// Health probe interval
    pub probe_interval: Duration,
    /// Timeout for a single health probe
    pub probe_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl DiscoveryConfig {
    pub fn with_endpoint(
        mut self,
        service: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        self.endpoints.insert(service.into(), endpoint.into());
        self
    }
}

/// Per-endpoint connection pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections created eagerly and restored on demand
    pub min_size: usize,
    /// Hard cap on open connections
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
        }
    }
}

/// Per-endpoint circuit breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time after the last failure before a probe call is admitted
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything the network client needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub discovery: DiscoveryConfig,
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    pub call_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            pool: PoolConfig::default(),
            breaker: BreakerConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}
