//! # Conduit Host
//!
//! Serves an [`OperationRegistry`] over HTTP so a service can run as its own
//! process and be reached by the network client.
//!
//! ```rust,ignore
//! use conduit_host::ServiceHost;
//!
//! let host = ServiceHost::new(registry);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8001").await?;
//! host.serve(listener, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! ```

pub mod server;

pub use server::{HostError, MAX_BODY_SIZE, ServiceHost, status_for};
