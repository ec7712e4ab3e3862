//! # Conduit Testing
//!
//! Test doubles shared across the workspace:
//!
//! - [`MockConnector`]: scripted connection outcomes with connect and send
//!   counters, so tests can assert that no network attempt was made
//! - [`MockHealthProbe`]: health probe answering from a mutable table
//! - [`EchoService`] and [`MemoryService`]: small services with tools and
//!   resources
//! - [`TestHost`]: a real service host on an ephemeral port

pub mod host;
pub mod mock_connector;
pub mod mock_probe;
pub mod services;

pub use host::TestHost;
pub use mock_connector::{MockConnector, MockOutcome};
pub use mock_probe::MockHealthProbe;
pub use services::{EchoService, MemoryService};
