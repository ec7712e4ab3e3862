//! # Conduit Core
//!
//! Building blocks shared by both deployment modes of the Conduit runtime:
//!
//! - **Error taxonomy**: [`ConduitError`] and its stable [`ErrorKind`]
//! - **Exposure**: services declare tools and resources through an
//!   [`ExposureTable`] or a [`ServiceBuilder`]
//! - **Schema extraction**: from a typed input descriptor or from declared
//!   [`Param`]s
//! - **Registry**: [`OperationRegistry`], a copy-on-write catalog of services
//! - **Client contract**: the [`Client`] trait and its in-process
//!   implementation, [`InProcessClient`]
//! - **Wire bodies** shared by the service host and the network client

pub mod client;
pub mod definition;
pub mod error;
pub mod exposure;
pub mod in_process;
pub mod output;
pub mod registry;
pub mod schema;
pub mod wire;

pub use client::Client;
pub use definition::{
    Handler, HandlerError, HandlerFuture, OperationDefinition, OperationKind, ResourceDefinition,
    ServiceDefinition, ServiceInstance, ToolDefinition,
};
pub use error::{BoxError, ConduitError, ConduitResult, ErrorKind, InvalidInput, RemoteFailure};
pub use exposure::{ExposureTable, Service, ServiceBuilder};
pub use in_process::InProcessClient;
pub use output::{Mapping, ResourceContent, normalize_resource_output, normalize_tool_output};
pub use registry::{OperationRegistry, Snapshot};
pub use schema::{Param, ParamKind, schema_for_type, schema_from_params};
