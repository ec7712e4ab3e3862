//! Transport-agnostic client contract.
//!
//! Both deployment modes implement [`Client`], and both fail with the same
//! [`ConduitError`](crate::ConduitError) kinds, so callers never need to know
//! which mode is active.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ConduitResult;
use crate::output::{Mapping, ResourceContent};

/// Invoke tools, read resources and introspect services.
#[async_trait]
pub trait Client: Send + Sync {
    /// Invoke a tool. `None` input is treated as an empty mapping.
    async fn call_tool(
        &self,
        service: &str,
        tool: &str,
        input: Option<Mapping>,
    ) -> ConduitResult<Mapping>;

    /// Read a resource. `None` params are treated as an empty mapping.
    async fn get_resource(
        &self,
        service: &str,
        resource: &str,
        params: Option<Mapping>,
    ) -> ConduitResult<ResourceContent>;

    /// Input schema of a tool.
    async fn get_tool_schema(&self, service: &str, tool: &str) -> ConduitResult<Value>;

    /// Input schema of a resource.
    async fn get_resource_schema(&self, service: &str, resource: &str) -> ConduitResult<Value>;

    /// Names of every known service, in stable order.
    async fn list_services(&self) -> ConduitResult<Vec<String>>;

    async fn list_tools(&self, service: &str) -> ConduitResult<Vec<String>>;

    async fn list_resources(&self, service: &str) -> ConduitResult<Vec<String>>;

    /// Release any resources held by the client. Safe to call repeatedly.
    async fn close(&self) {}
}
