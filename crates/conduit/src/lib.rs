//! # Conduit
//!
//! A runtime for invoking named tools and reading named resources exposed by
//! separate services, with one [`Client`] interface over two deployments:
//!
//! - **In-process**: every service lives in this process and calls go
//!   straight to the [`OperationRegistry`].
//! - **Distributed**: services run behind a [`ServiceHost`] and calls cross
//!   the network through discovery, a connection pool and a circuit breaker
//!   per endpoint.
//!
//! ```rust,ignore
//! use conduit::{ClientFactory, OperationRegistry, RuntimeConfigBuilder};
//! use std::sync::Arc;
//!
//! let config = RuntimeConfigBuilder::from_env()?.build()?;
//! let registry = Arc::new(OperationRegistry::new());
//! registry.register("memory", MemoryService::default())?;
//!
//! let factory = ClientFactory::new(config, registry);
//! let client = factory.client().await;
//! let output = client.call_tool("memory", "store", Some(input)).await?;
//! factory.shutdown().await;
//! ```

pub mod config;
pub mod factory;
pub mod telemetry;

pub use config::{ConfigError, DeploymentMode, RuntimeConfig, RuntimeConfigBuilder};
pub use factory::ClientFactory;
pub use telemetry::{LogFormat, init_logging};

pub use conduit_core::{
    BoxError, Client, ConduitError, ConduitResult, ErrorKind, ExposureTable, InProcessClient,
    InvalidInput, Mapping, OperationRegistry, Param, ResourceContent, Service, ServiceBuilder,
    ServiceDefinition,
};
pub use conduit_host::ServiceHost;
pub use conduit_net::{
    BreakerConfig, BreakerState, CircuitBreaker, ConnectionPool, DiscoveryConfig, HealthStatus,
    NetworkClient, NetworkConfig, PoolConfig, ServiceDiscovery,
};
