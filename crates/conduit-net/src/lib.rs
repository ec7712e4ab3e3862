//! # Conduit Net
//!
//! Distributed-mode plumbing for the Conduit runtime:
//!
//! - [`ServiceDiscovery`]: service name to endpoint mapping with a background
//!   health-probe loop
//! - [`ConnectionPool`]: bounded per-endpoint connection reuse
//! - [`CircuitBreaker`]: per-endpoint failure isolation
//! - [`NetworkClient`]: the [`Client`](conduit_core::Client) implementation
//!   composing the three over a [`Connector`]
//! - [`HttpConnector`]: JSON-over-HTTP transport

pub mod breaker;
pub mod client;
pub mod config;
pub mod discovery;
pub mod pool;
pub mod transport;

pub use breaker::{BreakerState, CircuitBreaker};
pub use client::NetworkClient;
pub use config::{BreakerConfig, DiscoveryConfig, NetworkConfig, PoolConfig};
pub use discovery::{
    DiscoveryEvent, EndpointRecord, HealthProbe, HealthStatus, HttpHealthProbe, ServiceDiscovery,
};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use transport::{Connection, Connector, HttpConnection, HttpConnector, RemoteRequest};
