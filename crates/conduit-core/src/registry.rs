//! In-memory catalog of services and the operations they expose.
//!
//! The published map is copy-on-write: a writer builds a new map under the
//! writer mutex and swaps the shared pointer, so lookups never block on a
//! registration and never see a half-written service.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;

use crate::definition::{ResourceDefinition, ServiceDefinition, ToolDefinition};
use crate::error::{ConduitError, ConduitResult};
use crate::exposure::Service;

/// Published registry state: service name to definition, in name order.
pub type Snapshot = Arc<BTreeMap<String, Arc<ServiceDefinition>>>;

/// Registry of services keyed by unique name.
#[derive(Default)]
pub struct OperationRegistry {
    published: RwLock<Snapshot>,
    writer: Mutex<()>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service instance under `name`, replacing any previous
    /// definition with that name.
    pub fn register<S: Service>(&self, name: impl Into<String>, instance: S) -> ConduitResult<()> {
        self.register_shared(name, Arc::new(instance))
    }

    /// Register an already shared service instance.
    pub fn register_shared<S: Service>(
        &self,
        name: impl Into<String>,
        instance: Arc<S>,
    ) -> ConduitResult<()> {
        let definition = ServiceDefinition::from_service(name, instance)?;
        self.register_definition(definition);
        Ok(())
    }

    /// Publish a prebuilt definition, replacing any previous one with the
    /// same name. Nothing from the previous definition is kept.
    pub fn register_definition(&self, definition: ServiceDefinition) {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let name = definition.name().to_string();
        let tools = definition.tool_names().len();
        let resources = definition.resource_names().len();

        let mut next = BTreeMap::clone(&self.snapshot());
        let replaced = next.insert(name.clone(), Arc::new(definition)).is_some();
        self.publish(next);

        info!(
            service = %name,
            tools,
            resources,
            replaced,
            "Registered service"
        );
    }

    /// Remove a service.
    pub fn unregister(&self, name: &str) -> ConduitResult<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = BTreeMap::clone(&self.snapshot());
        if next.remove(name).is_none() {
            return Err(ConduitError::service_not_found(name));
        }
        self.publish(next);

        info!(service = %name, "Unregistered service");
        Ok(())
    }

    /// The currently published state.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.published.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, next: BTreeMap<String, Arc<ServiceDefinition>>) {
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    pub fn get_service(&self, name: &str) -> ConduitResult<Arc<ServiceDefinition>> {
        self.snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| ConduitError::service_not_found(name))
    }

    /// Look up a tool together with the service that owns it.
    pub fn get_tool(
        &self,
        service: &str,
        tool: &str,
    ) -> ConduitResult<(Arc<ServiceDefinition>, Arc<ToolDefinition>)> {
        let definition = self.get_service(service)?;
        let found = definition
            .tool(tool)
            .cloned()
            .ok_or_else(|| ConduitError::tool_not_found(service, tool))?;
        Ok((definition, found))
    }

    /// Look up a resource together with the service that owns it.
    pub fn get_resource(
        &self,
        service: &str,
        resource: &str,
    ) -> ConduitResult<(Arc<ServiceDefinition>, Arc<ResourceDefinition>)> {
        let definition = self.get_service(service)?;
        let found = definition
            .resource(resource)
            .cloned()
            .ok_or_else(|| ConduitError::resource_not_found(service, resource))?;
        Ok((definition, found))
    }

    pub fn list_services(&self) -> Vec<String> {
        self.snapshot().keys().cloned().collect()
    }

    pub fn list_tools(&self, service: &str) -> ConduitResult<Vec<String>> {
        Ok(self.get_service(service)?.tool_names())
    }

    pub fn list_resources(&self, service: &str) -> ConduitResult<Vec<String>> {
        Ok(self.get_service(service)?.resource_names())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("services", &self.list_services())
            .finish()
    }
}
