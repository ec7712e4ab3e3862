//! Tool, resource and service definitions.
//!
//! Definitions are immutable once built. A [`ServiceDefinition`] owns its
//! tool and resource maps exclusively; the two namespaces are independent, so
//! a tool and a resource may share a name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BoxError;
use crate::output::Mapping;

/// Opaque service instance passed to every handler as its receiver.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Future produced by a type-erased handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// Type-erased callable stored in a definition.
pub type Handler = Arc<dyn Fn(ServiceInstance, Mapping) -> HandlerFuture + Send + Sync>;

/// Failure produced by a type-erased handler before client translation.
#[derive(Debug)]
pub enum HandlerError {
    /// The input could not be turned into the handler's declared input type.
    InvalidInput(String),
    /// The callable itself failed.
    Failed(BoxError),
}

/// Whether an operation is a tool or a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Tool,
    Resource,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Tool => write!(f, "tool"),
            OperationKind::Resource => write!(f, "resource"),
        }
    }
}

/// A named, invocable operation exposed by a service.
#[derive(Clone)]
pub struct OperationDefinition {
    kind: OperationKind,
    name: String,
    description: String,
    input_schema: Value,
    handler: Handler,
}

/// Definition of a tool: an operation that may have side effects.
pub type ToolDefinition = OperationDefinition;

/// Definition of a resource: a read-only data accessor.
pub type ResourceDefinition = OperationDefinition;

impl OperationDefinition {
    pub fn new(
        kind: OperationKind,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Handler,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Run the stored callable with `instance` as receiver.
    pub fn invoke(&self, instance: ServiceInstance, input: Mapping) -> HandlerFuture {
        (self.handler)(instance, input)
    }
}

impl fmt::Debug for OperationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDefinition")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A uniquely-named grouping of tools and resources.
#[derive(Clone)]
pub struct ServiceDefinition {
    name: String,
    instance: ServiceInstance,
    tools: BTreeMap<String, Arc<ToolDefinition>>,
    resources: BTreeMap<String, Arc<ResourceDefinition>>,
}

impl ServiceDefinition {
    /// Assemble a definition from already-validated operation maps.
    pub(crate) fn from_parts(
        name: String,
        instance: ServiceInstance,
        tools: BTreeMap<String, Arc<ToolDefinition>>,
        resources: BTreeMap<String, Arc<ResourceDefinition>>,
    ) -> Self {
        Self {
            name,
            instance,
            tools,
            resources,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> ServiceInstance {
        Arc::clone(&self.instance)
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<ToolDefinition>> {
        self.tools.get(name)
    }

    pub fn resource(&self, name: &str) -> Option<&Arc<ResourceDefinition>> {
        self.resources.get(name)
    }

    /// Tool names in stable (sorted) order.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Resource names in stable (sorted) order.
    pub fn resource_names(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<ToolDefinition>> {
        self.tools.values()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Arc<ResourceDefinition>> {
        self.resources.values()
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}
