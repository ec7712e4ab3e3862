//! Explicit exposure of service callables.
//!
//! A service declares its tools and resources in a static table at
//! construction time instead of having marked methods discovered at runtime.
//!
//! # Example
//!
//! ```rust
//! use conduit_core::{ExposureTable, OperationRegistry, Param, Service};
//! use serde_json::json;
//!
//! struct Echo;
//!
//! impl Service for Echo {
//!     fn expose(table: &mut ExposureTable<Self>) {
//!         table.tool("ping", "Replies with pong", &[], |_svc, _input| async {
//!             Ok(json!({ "pong": true }))
//!         });
//!         table.resource("greeting", "Static greeting", &[Param::optional("name")], |_svc, input| async move {
//!             let name = input.get("name").and_then(|v| v.as_str()).unwrap_or("world").to_string();
//!             Ok(json!({ "text": format!("hello {name}") }))
//!         });
//!     }
//! }
//!
//! let registry = OperationRegistry::new();
//! registry.register("echo", Echo).unwrap();
//! assert_eq!(registry.list_tools("echo").unwrap(), vec!["ping"]);
//! ```

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::definition::{
    Handler, HandlerError, HandlerFuture, OperationDefinition, OperationKind, ServiceDefinition,
    ServiceInstance,
};
use crate::error::{BoxError, ConduitError, ConduitResult};
use crate::output::Mapping;
use crate::schema::{Param, check_descriptor, schema_for_type, schema_from_params};

/// A type whose instances expose tools and resources.
pub trait Service: Send + Sync + Sized + 'static {
    /// Declare every exposed callable.
    fn expose(table: &mut ExposureTable<Self>);
}

struct Declared {
    kind: OperationKind,
    name: String,
    description: String,
    schema: Result<Value, String>,
    handler: Handler,
}

/// The registration table a service fills in.
pub struct ExposureTable<S> {
    declared: Vec<Declared>,
    _service: PhantomData<fn() -> S>,
}

impl<S> Default for ExposureTable<S>
where
    S: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ExposureTable<S>
where
    S: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            declared: Vec::new(),
            _service: PhantomData,
        }
    }

    /// Number of declared operations.
    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    fn push(
        &mut self,
        kind: OperationKind,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Result<Value, String>,
        handler: Handler,
    ) -> &mut Self {
        self.declared.push(Declared {
            kind,
            name: name.into(),
            description: description.into(),
            schema,
            handler,
        });
        self
    }

    /// Expose a tool whose schema is derived from its declared parameters.
    pub fn tool<F, Fut, T>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        params: &[Param],
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Arc<S>, Mapping) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Serialize,
    {
        let schema = Ok(schema_from_params(params));
        self.push(OperationKind::Tool, name, description, schema, erase(handler))
    }

    /// Expose a tool with an explicit JSON schema descriptor.
    pub fn tool_with_schema<F, Fut, T>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Arc<S>, Mapping) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Serialize,
    {
        let schema = check_descriptor(&schema).map(|()| schema);
        self.push(OperationKind::Tool, name, description, schema, erase(handler))
    }

    /// Expose a tool with a typed, validated input.
    pub fn typed_tool<I, F, Fut, T>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        I: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(Arc<S>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Serialize,
    {
        let schema = schema_for_type::<I>().map_err(|e| e.to_string());
        self.push(
            OperationKind::Tool,
            name,
            description,
            schema,
            erase_typed(handler),
        )
    }

    /// Expose a resource whose schema is derived from its declared parameters.
    pub fn resource<F, Fut, T>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        params: &[Param],
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Arc<S>, Mapping) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Serialize,
    {
        let schema = Ok(schema_from_params(params));
        self.push(
            OperationKind::Resource,
            name,
            description,
            schema,
            erase(handler),
        )
    }

    /// Expose a resource with an explicit JSON schema descriptor.
    pub fn resource_with_schema<F, Fut, T>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Arc<S>, Mapping) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Serialize,
    {
        let schema = check_descriptor(&schema).map(|()| schema);
        self.push(
            OperationKind::Resource,
            name,
            description,
            schema,
            erase(handler),
        )
    }

    /// Expose a resource with typed, validated params.
    pub fn typed_resource<I, F, Fut, T>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> &mut Self
    where
        I: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(Arc<S>, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Serialize,
    {
        let schema = schema_for_type::<I>().map_err(|e| e.to_string());
        self.push(
            OperationKind::Resource,
            name,
            description,
            schema,
            erase_typed(handler),
        )
    }

    /// Validate the table and build the service definition.
    pub fn into_definition(
        self,
        service: impl Into<String>,
        instance: Arc<S>,
    ) -> ConduitResult<ServiceDefinition> {
        let service = service.into();
        if service.trim().is_empty() {
            return Err(ConduitError::service_initialization(
                service,
                "service name cannot be empty",
            ));
        }

        let mut tools = BTreeMap::new();
        let mut resources = BTreeMap::new();

        for declared in self.declared {
            if declared.name.trim().is_empty() {
                return Err(ConduitError::service_initialization(
                    &service,
                    format!("{} name cannot be empty", declared.kind),
                ));
            }
            let schema = declared.schema.map_err(|reason| {
                ConduitError::service_initialization(
                    &service,
                    format!(
                        "invalid schema for {} '{}': {reason}",
                        declared.kind, declared.name
                    ),
                )
            })?;

            let target = match declared.kind {
                OperationKind::Tool => &mut tools,
                OperationKind::Resource => &mut resources,
            };
            match target.entry(declared.name.clone()) {
                Entry::Occupied(_) => {
                    return Err(ConduitError::service_initialization(
                        &service,
                        format!("duplicate {} name '{}'", declared.kind, declared.name),
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(OperationDefinition::new(
                        declared.kind,
                        declared.name,
                        declared.description,
                        schema,
                        declared.handler,
                    )));
                }
            }
        }

        let instance: ServiceInstance = instance;
        Ok(ServiceDefinition::from_parts(
            service, instance, tools, resources,
        ))
    }
}

/// Builds a [`ServiceDefinition`] for an instance that does not implement
/// [`Service`], or whose exposure depends on runtime values.
pub struct ServiceBuilder<S> {
    name: String,
    instance: Arc<S>,
    table: ExposureTable<S>,
}

impl<S> ServiceBuilder<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, instance: S) -> Self {
        Self::shared(name, Arc::new(instance))
    }

    pub fn shared(name: impl Into<String>, instance: Arc<S>) -> Self {
        Self {
            name: name.into(),
            instance,
            table: ExposureTable::new(),
        }
    }

    /// Declare operations on the underlying table.
    pub fn expose(mut self, declare: impl FnOnce(&mut ExposureTable<S>)) -> Self {
        declare(&mut self.table);
        self
    }

    pub fn build(self) -> ConduitResult<ServiceDefinition> {
        self.table.into_definition(self.name, self.instance)
    }
}

impl ServiceDefinition {
    /// Build the definition of a [`Service`] implementation.
    pub fn from_service<S: Service>(
        name: impl Into<String>,
        instance: Arc<S>,
    ) -> ConduitResult<ServiceDefinition> {
        let mut table = ExposureTable::new();
        S::expose(&mut table);
        table.into_definition(name, instance)
    }
}

fn receiver<S: Send + Sync + 'static>(instance: ServiceInstance) -> Result<Arc<S>, HandlerError> {
    instance.downcast::<S>().map_err(|_| {
        HandlerError::Failed(
            format!(
                "service instance is not a {}",
                std::any::type_name::<S>()
            )
            .into(),
        )
    })
}

fn to_value<T: Serialize>(output: T) -> Result<Value, HandlerError> {
    serde_json::to_value(output).map_err(|e| HandlerError::Failed(Box::new(e)))
}

fn erase<S, F, Fut, T>(handler: F) -> Handler
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, Mapping) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Serialize,
{
    Arc::new(move |instance: ServiceInstance, input: Mapping| -> HandlerFuture {
        let svc = match receiver::<S>(instance) {
            Ok(svc) => svc,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let fut = handler(svc, input);
        Box::pin(async move { to_value(fut.await.map_err(HandlerError::Failed)?) })
    })
}

fn erase_typed<S, I, F, Fut, T>(handler: F) -> Handler
where
    S: Send + Sync + 'static,
    I: DeserializeOwned + Send + 'static,
    F: Fn(Arc<S>, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Serialize,
{
    Arc::new(move |instance: ServiceInstance, input: Mapping| -> HandlerFuture {
        let svc = match receiver::<S>(instance) {
            Ok(svc) => svc,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let typed = match serde_json::from_value::<I>(Value::Object(input)) {
            Ok(typed) => typed,
            Err(e) => {
                let reason = e.to_string();
                return Box::pin(async move { Err(HandlerError::InvalidInput(reason)) });
            }
        };
        let fut = handler(svc, typed);
        Box::pin(async move { to_value(fut.await.map_err(HandlerError::Failed)?) })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Counter {
        start: i64,
    }

    #[derive(Deserialize, JsonSchema)]
    struct AddInput {
        amount: i64,
    }

    impl Service for Counter {
        fn expose(table: &mut ExposureTable<Self>) {
            table
                .typed_tool(
                    "add",
                    "Add to the start value",
                    |svc: Arc<Counter>, input: AddInput| async move {
                        Ok(json!({ "total": svc.start + input.amount }))
                    },
                )
                .resource(
                    "start",
                    "Current start value",
                    &[Param::receiver()],
                    |svc, _params| async move { Ok(json!({ "start": svc.start })) },
                );
        }
    }

    #[tokio::test]
    async fn test_service_definition_dispatches_with_receiver() {
        let def =
            ServiceDefinition::from_service("counter", Arc::new(Counter { start: 40 })).unwrap();
        assert_eq!(def.tool_names(), vec!["add"]);
        assert_eq!(def.resource_names(), vec!["start"]);

        let add = def.tool("add").unwrap();
        let mut input = Mapping::new();
        input.insert("amount".into(), json!(2));
        let out = add.invoke(def.instance(), input).await.unwrap();
        assert_eq!(out, json!({ "total": 42 }));
    }

    #[tokio::test]
    async fn test_typed_input_rejects_bad_shape() {
        let def =
            ServiceDefinition::from_service("counter", Arc::new(Counter { start: 0 })).unwrap();
        let add = def.tool("add").unwrap();
        let err = add.invoke(def.instance(), Mapping::new()).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
    }

    #[test]
    fn test_duplicate_tool_name_is_rejected() {
        let result = ServiceBuilder::new("dup", ())
            .expose(|t| {
                t.tool("x", "", &[], |_s, _i| async { Ok(json!({})) });
                t.tool("x", "", &[], |_s, _i| async { Ok(json!({})) });
            })
            .build();
        assert!(matches!(
            result,
            Err(ConduitError::ServiceInitialization { .. })
        ));
    }

    #[test]
    fn test_tool_and_resource_namespaces_are_independent() {
        let def = ServiceBuilder::new("both", ())
            .expose(|t| {
                t.tool("item", "", &[], |_s, _i| async { Ok(json!({})) });
                t.resource("item", "", &[], |_s, _i| async { Ok(json!({})) });
            })
            .build()
            .unwrap();
        assert!(def.tool("item").is_some());
        assert!(def.resource("item").is_some());
    }

    #[test]
    fn test_invalid_descriptor_fails_registration() {
        let result = ServiceBuilder::new("bad", ())
            .expose(|t| {
                t.tool_with_schema("x", "", json!({ "type": "array" }), |_s, _i| async {
                    Ok(json!({}))
                });
            })
            .build();
        assert!(matches!(
            result,
            Err(ConduitError::ServiceInitialization { .. })
        ));
    }

    #[test]
    fn test_empty_service_name_is_rejected() {
        let result = ServiceBuilder::new("  ", ()).build();
        assert!(result.is_err());
    }
}
