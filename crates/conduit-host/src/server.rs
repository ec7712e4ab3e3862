//! Axum router implementing the service wire contract.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use conduit_core::wire::{
    CallToolRequest, HealthResponse, OutputResponse, ReadResourceRequest, ResourcesResponse,
    SchemaResponse, ServicesResponse, ToolsResponse, WireError,
};
use conduit_core::{Client, ConduitError, ErrorKind, InProcessClient, OperationRegistry};

/// Errors raised while running the host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to read listener address: {0}")]
    Address(#[source] std::io::Error),

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// HTTP status used for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ServiceNotFound | ErrorKind::ToolNotFound | ErrorKind::ResourceNotFound => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::TransportError => StatusCode::BAD_GATEWAY,
        ErrorKind::ToolExecutionError
        | ErrorKind::ResourceAccessError
        | ErrorKind::ServiceInitializationError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Wrapper for runtime errors that implements IntoResponse
struct ErrorResponse(ConduitError);

impl From<ConduitError> for ErrorResponse {
    fn from(err: ConduitError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        debug!(code = self.0.error_code(), error = %self.0, "Request failed");
        (status, Json(WireError::from(&self.0))).into_response()
    }
}

type HostResult<T> = Result<Json<T>, ErrorResponse>;

/// Largest request body accepted by the host.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Serves one registry to remote callers.
#[derive(Debug, Clone)]
pub struct ServiceHost {
    client: Arc<InProcessClient>,
}

impl ServiceHost {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self {
            client: Arc::new(InProcessClient::new(registry)),
        }
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        self.client.registry()
    }

    /// Build the Axum router for this host
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/services", get(list_services))
            .route("/services/{service}/tools", get(list_tools))
            .route("/services/{service}/resources", get(list_resources))
            .route("/services/{service}/tools/{tool}/schema", get(tool_schema))
            .route(
                "/services/{service}/resources/{resource}/schema",
                get(resource_schema),
            )
            .route("/services/{service}/tools/{tool}/call", post(call_tool))
            .route(
                "/services/{service}/resources/{resource}/read",
                post(read_resource),
            )
            .with_state(Arc::clone(&self.client))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until `shutdown` resolves, then drain in-flight
    /// requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), HostError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = listener.local_addr().map_err(HostError::Address)?;
        info!(
            address = %address,
            services = self.registry().len(),
            "Service host starting"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(HostError::Serve)?;

        info!(address = %address, "Service host stopped");
        Ok(())
    }
}

// =============================================================================
// Route Handlers
// =============================================================================

type AppState = State<Arc<InProcessClient>>;

/// Decode an optional JSON body; an empty body means defaults.
fn parse_body<T: DeserializeOwned + Default>(
    body: &Bytes,
    service: &str,
    name: &str,
) -> Result<T, ErrorResponse> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ConduitError::validation(service, name, format!("malformed body: {e}")).into())
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// GET /services
async fn list_services(State(client): AppState) -> HostResult<ServicesResponse> {
    let services = client.list_services().await?;
    Ok(Json(ServicesResponse { services }))
}

async fn list_tools(
    State(client): AppState,
    Path(service): Path<String>,
) -> HostResult<ToolsResponse> {
    let tools = client.list_tools(&service).await?;
    Ok(Json(ToolsResponse { tools }))
}

async fn list_resources(
    State(client): AppState,
    Path(service): Path<String>,
) -> HostResult<ResourcesResponse> {
    let resources = client.list_resources(&service).await?;
    Ok(Json(ResourcesResponse { resources }))
}

async fn tool_schema(
    State(client): AppState,
    Path((service, tool)): Path<(String, String)>,
) -> HostResult<SchemaResponse> {
    let schema = client.get_tool_schema(&service, &tool).await?;
    Ok(Json(SchemaResponse { schema }))
}

async fn resource_schema(
    State(client): AppState,
    Path((service, resource)): Path<(String, String)>,
) -> HostResult<SchemaResponse> {
    let schema = client.get_resource_schema(&service, &resource).await?;
    Ok(Json(SchemaResponse { schema }))
}

/// POST /services/{service}/tools/{tool}/call
async fn call_tool(
    State(client): AppState,
    Path((service, tool)): Path<(String, String)>,
    body: Bytes,
) -> HostResult<OutputResponse> {
    let request: CallToolRequest = parse_body(&body, &service, &tool)?;
    let output = client.call_tool(&service, &tool, Some(request.input)).await?;
    Ok(Json(OutputResponse {
        output: serde_json::Value::Object(output),
    }))
}

/// POST /services/{service}/resources/{resource}/read
async fn read_resource(
    State(client): AppState,
    Path((service, resource)): Path<(String, String)>,
    body: Bytes,
) -> HostResult<OutputResponse> {
    let request: ReadResourceRequest = parse_body(&body, &service, &resource)?;
    let output = client
        .get_resource(&service, &resource, Some(request.params))
        .await?;
    Ok(Json(OutputResponse {
        output: output.into_value(),
    }))
}
