//! Client that dispatches directly into an [`OperationRegistry`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::client::Client;
use crate::definition::{HandlerError, OperationKind};
use crate::error::{BoxError, ConduitError, ConduitResult, InvalidInput};
use crate::output::{Mapping, ResourceContent, normalize_resource_output, normalize_tool_output};
use crate::registry::OperationRegistry;

/// In-process implementation of [`Client`].
///
/// Lookups go through the shared registry; the stored callable is invoked
/// with the service instance as receiver and awaited on the caller's task.
#[derive(Debug, Clone)]
pub struct InProcessClient {
    registry: Arc<OperationRegistry>,
}

impl InProcessClient {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }
}

/// Translate a handler failure into the client error taxonomy.
fn translate(kind: OperationKind, service: &str, name: &str, err: HandlerError) -> ConduitError {
    let cause: BoxError = match err {
        HandlerError::InvalidInput(reason) => {
            return ConduitError::validation(service, name, reason);
        }
        HandlerError::Failed(cause) => cause,
    };

    // Runtime errors raised inside a handler propagate unchanged.
    let cause = match cause.downcast::<ConduitError>() {
        Ok(runtime) => return *runtime,
        Err(other) => other,
    };
    let cause = match cause.downcast::<InvalidInput>() {
        Ok(invalid) => return ConduitError::validation(service, name, invalid.reason()),
        Err(other) => other,
    };

    match kind {
        OperationKind::Tool => ConduitError::tool_execution(service, name, cause),
        OperationKind::Resource => ConduitError::resource_access(service, name, cause),
    }
}

#[async_trait]
impl Client for InProcessClient {
    async fn call_tool(
        &self,
        service: &str,
        tool: &str,
        input: Option<Mapping>,
    ) -> ConduitResult<Mapping> {
        let (definition, found) = self.registry.get_tool(service, tool)?;
        debug!(service, tool, "Invoking tool in process");

        let output = found
            .invoke(definition.instance(), input.unwrap_or_default())
            .await
            .map_err(|e| translate(OperationKind::Tool, service, tool, e))?;
        Ok(normalize_tool_output(output))
    }

    async fn get_resource(
        &self,
        service: &str,
        resource: &str,
        params: Option<Mapping>,
    ) -> ConduitResult<ResourceContent> {
        let (definition, found) = self.registry.get_resource(service, resource)?;
        debug!(service, resource, "Reading resource in process");

        let output = found
            .invoke(definition.instance(), params.unwrap_or_default())
            .await
            .map_err(|e| translate(OperationKind::Resource, service, resource, e))?;
        Ok(normalize_resource_output(output))
    }

    async fn get_tool_schema(&self, service: &str, tool: &str) -> ConduitResult<Value> {
        let (_, found) = self.registry.get_tool(service, tool)?;
        Ok(found.input_schema().clone())
    }

    async fn get_resource_schema(&self, service: &str, resource: &str) -> ConduitResult<Value> {
        let (_, found) = self.registry.get_resource(service, resource)?;
        Ok(found.input_schema().clone())
    }

    async fn list_services(&self) -> ConduitResult<Vec<String>> {
        Ok(self.registry.list_services())
    }

    async fn list_tools(&self, service: &str) -> ConduitResult<Vec<String>> {
        self.registry.list_tools(service)
    }

    async fn list_resources(&self, service: &str) -> ConduitResult<Vec<String>> {
        self.registry.list_resources(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::{ExposureTable, Service, ServiceBuilder};
    use crate::schema::Param;
    use serde_json::json;
    use std::error::Error as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    impl Service for Echo {
        fn expose(table: &mut ExposureTable<Self>) {
            table
                .tool("ping", "Replies with pong", &[], |svc: Arc<Echo>, _input| async move {
                    svc.calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "pong": true }))
                })
                .tool("boom", "Always fails", &[], |_svc, _input| async {
                    Err::<Value, BoxError>("kaboom".into())
                })
                .tool("strict", "Rejects its input", &[Param::required("n")], |_svc, _input| async {
                    Err::<Value, BoxError>(Box::new(InvalidInput::new("n must be positive")))
                })
                .tool("nothing", "Returns null", &[], |_svc, _input| async { Ok(Value::Null) })
                .resource("items", "A list of items", &[], |_svc, _params| async {
                    Ok(json!([{ "id": 1 }, { "id": 2 }]))
                })
                .resource("broken", "Always fails", &[], |_svc, _params| async {
                    Err::<Value, BoxError>("disk gone".into())
                });
        }
    }

    fn client() -> (InProcessClient, Arc<Echo>) {
        let registry = Arc::new(OperationRegistry::new());
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        registry.register_shared("echo", Arc::clone(&echo)).unwrap();
        (InProcessClient::new(registry), echo)
    }

    #[tokio::test]
    async fn test_call_tool_dispatches_to_registered_callable() {
        let (client, echo) = client();
        let out = client
            .call_tool("echo", "ping", Some(Mapping::new()))
            .await
            .unwrap();
        assert_eq!(Value::Object(out), json!({ "pong": true }));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_service_is_service_not_found() {
        let (client, _) = client();
        let err = client
            .call_tool("missing", "x", Some(Mapping::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::ServiceNotFound { .. }));

        let err = client.get_resource("missing", "x", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::ServiceNotFound { .. }));
        let err = client.get_tool_schema("missing", "x").await.unwrap_err();
        assert!(matches!(err, ConduitError::ServiceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_failing_tool_wraps_original_cause() {
        let (client, _) = client();
        let err = client.call_tool("echo", "boom", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::ToolExecution { .. }));
        assert_eq!(err.source().unwrap().to_string(), "kaboom");
    }

    #[tokio::test]
    async fn test_invalid_input_maps_to_validation() {
        let (client, _) = client();
        let err = client.call_tool("echo", "strict", None).await.unwrap_err();
        match err {
            ConduitError::Validation { reason, .. } => assert_eq!(reason, "n must be positive"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_null_output_is_empty_mapping() {
        let (client, _) = client();
        let out = client.call_tool("echo", "nothing", None).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_resource_sequence_and_failure() {
        let (client, _) = client();
        let items = client.get_resource("echo", "items", None).await.unwrap();
        assert_eq!(items.as_sequence().map(<[Mapping]>::len), Some(2));

        let err = client.get_resource("echo", "broken", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::ResourceAccess { .. }));
        let err = client.get_resource("echo", "nope", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_runtime_error_from_handler_propagates_unchanged() {
        let registry = Arc::new(OperationRegistry::new());
        registry.register_definition(
            ServiceBuilder::new("proxy", ())
                .expose(|t| {
                    t.tool("forward", "", &[], |_s, _i| async {
                        Err::<Value, BoxError>(Box::new(ConduitError::service_not_found("inner")))
                    });
                })
                .build()
                .unwrap(),
        );
        let client = InProcessClient::new(registry);
        let err = client.call_tool("proxy", "forward", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::ServiceNotFound { ref service } if service == "inner"));
    }

    #[tokio::test]
    async fn test_schemas_and_listings() {
        let (client, _) = client();
        let schema = client.get_tool_schema("echo", "strict").await.unwrap();
        assert_eq!(schema["required"], json!(["n"]));
        assert_eq!(client.list_services().await.unwrap(), vec!["echo"]);
        assert_eq!(
            client.list_tools("echo").await.unwrap(),
            vec!["boom", "nothing", "ping", "strict"]
        );
        assert_eq!(
            client.list_resources("echo").await.unwrap(),
            vec!["broken", "items"]
        );
    }
}
