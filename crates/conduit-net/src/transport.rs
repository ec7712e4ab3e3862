//! Connection abstraction and the HTTP transport.
//!
//! A [`Connector`] opens [`Connection`]s to an endpoint; the pool keeps them
//! and the network client borrows one per call. [`HttpConnector`] speaks the
//! JSON-over-HTTP contract served by `conduit-host`.

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use conduit_core::wire::{CallToolRequest, ReadResourceRequest, WireError};
use conduit_core::{ConduitError, ConduitResult, Mapping};

/// A single remote operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteRequest {
    CallTool {
        service: String,
        tool: String,
        input: Mapping,
    },
    ReadResource {
        service: String,
        resource: String,
        params: Mapping,
    },
    ToolSchema {
        service: String,
        tool: String,
    },
    ResourceSchema {
        service: String,
        resource: String,
    },
    ListTools {
        service: String,
    },
    ListResources {
        service: String,
    },
}

impl RemoteRequest {
    pub fn service(&self) -> &str {
        match self {
            RemoteRequest::CallTool { service, .. }
            | RemoteRequest::ReadResource { service, .. }
            | RemoteRequest::ToolSchema { service, .. }
            | RemoteRequest::ResourceSchema { service, .. }
            | RemoteRequest::ListTools { service }
            | RemoteRequest::ListResources { service } => service,
        }
    }

    pub fn method(&self) -> Method {
        match self {
            RemoteRequest::CallTool { .. } | RemoteRequest::ReadResource { .. } => Method::POST,
            _ => Method::GET,
        }
    }

    /// Path segments below the endpoint root.
    pub fn segments(&self) -> Vec<&str> {
        match self {
            RemoteRequest::CallTool { service, tool, .. } => {
                vec!["services", service.as_str(), "tools", tool.as_str(), "call"]
            }
            RemoteRequest::ReadResource {
                service, resource, ..
            } => vec!["services", service.as_str(), "resources", resource.as_str(), "read"],
            RemoteRequest::ToolSchema { service, tool } => {
                vec!["services", service.as_str(), "tools", tool.as_str(), "schema"]
            }
            RemoteRequest::ResourceSchema { service, resource } => {
                vec!["services", service.as_str(), "resources", resource.as_str(), "schema"]
            }
            RemoteRequest::ListTools { service } => vec!["services", service.as_str(), "tools"],
            RemoteRequest::ListResources { service } => {
                vec!["services", service.as_str(), "resources"]
            }
        }
    }

    /// JSON body for POST requests.
    pub fn body(&self) -> Option<Value> {
        match self {
            RemoteRequest::CallTool { input, .. } => serde_json::to_value(CallToolRequest {
                input: input.clone(),
            })
            .ok(),
            RemoteRequest::ReadResource { params, .. } => {
                serde_json::to_value(ReadResourceRequest {
                    params: params.clone(),
                })
                .ok()
            }
            _ => None,
        }
    }
}

/// An exclusive session with one endpoint.
#[async_trait]
pub trait Connection: Send {
    /// Perform one request and return the decoded success body.
    ///
    /// Error bodies from the remote end are decoded into the matching
    /// [`ConduitError`] kind.
    async fn send(&mut self, request: RemoteRequest) -> ConduitResult<Value>;

    /// Whether the session can no longer be reused.
    fn is_broken(&self) -> bool;

    /// Tear the session down.
    fn close(&mut self) {}
}

/// Opens connections to endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, service: &str, endpoint: &str) -> ConduitResult<Box<dyn Connection>>;
}

// ============================================================================
// HTTP transport
// ============================================================================

/// Opens one `reqwest` client session per pooled connection.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    connect_timeout: Option<Duration>,
}

impl HttpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, service: &str, endpoint: &str) -> ConduitResult<Box<dyn Connection>> {
        let base = Url::parse(endpoint).map_err(|e| {
            ConduitError::transport_with_source(service, endpoint, "invalid endpoint URL", e)
        })?;
        if base.cannot_be_a_base() {
            return Err(ConduitError::transport(
                service,
                endpoint,
                "endpoint URL cannot be a base",
            ));
        }

        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(1);
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            ConduitError::transport_with_source(service, endpoint, "failed to build HTTP client", e)
        })?;

        debug!(service, endpoint, "Opened HTTP connection");
        Ok(Box::new(HttpConnection {
            client,
            base,
            endpoint: endpoint.to_string(),
            broken: false,
        }))
    }
}

pub struct HttpConnection {
    client: reqwest::Client,
    base: Url,
    endpoint: String,
    broken: bool,
}

impl HttpConnection {
    fn url(&self, request: &RemoteRequest) -> ConduitResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ConduitError::transport(request.service(), &self.endpoint, "invalid endpoint URL")
            })?
            .pop_if_empty()
            .extend(request.segments());
        Ok(url)
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn send(&mut self, request: RemoteRequest) -> ConduitResult<Value> {
        let service = request.service().to_string();
        let url = self.url(&request)?;

        let mut builder = self.client.request(request.method(), url);
        if let Some(body) = request.body() {
            builder = builder.json(&body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                self.broken = true;
                return Err(ConduitError::transport_with_source(
                    service,
                    &self.endpoint,
                    "request failed",
                    e,
                ));
            }
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.broken = true;
                return Err(ConduitError::transport_with_source(
                    service,
                    &self.endpoint,
                    format!("unreadable response body (status {status})"),
                    e,
                ));
            }
        };

        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(|e| {
                ConduitError::transport_with_source(
                    service,
                    &self.endpoint,
                    "malformed response body",
                    e,
                )
            });
        }
        match serde_json::from_slice::<WireError>(&bytes) {
            Ok(wire) => Err(wire.into_error(&self.endpoint)),
            Err(_) => Err(ConduitError::transport(
                service,
                &self.endpoint,
                unexpected_status(status),
            )),
        }
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    fn close(&mut self) {
        self.broken = true;
    }
}

fn unexpected_status(status: StatusCode) -> String {
    format!("unexpected status {status}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_paths() {
        let req = RemoteRequest::CallTool {
            service: "echo".into(),
            tool: "ping".into(),
            input: Mapping::new(),
        };
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.segments(), vec!["services", "echo", "tools", "ping", "call"]);
        assert_eq!(req.body(), Some(serde_json::json!({ "input": {} })));

        let req = RemoteRequest::ListResources {
            service: "memory".into(),
        };
        assert_eq!(req.method(), Method::GET);
        assert!(req.body().is_none());
    }

    #[tokio::test]
    async fn test_url_escapes_segments() {
        let conn = HttpConnector::new()
            .connect("odd", "http://localhost:8080/base/")
            .await
            .unwrap();
        drop(conn);

        let http = HttpConnection {
            client: reqwest::Client::new(),
            base: Url::parse("http://localhost:8080/base/").unwrap(),
            endpoint: "http://localhost:8080/base/".into(),
            broken: false,
        };
        let url = http
            .url(&RemoteRequest::ToolSchema {
                service: "odd name".into(),
                tool: "a/b".into(),
            })
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/base/services/odd%20name/tools/a%2Fb/schema"
        );
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_transport_error() {
        let err = HttpConnector::new()
            .connect("svc", "not a url")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConduitError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_breaks_connection() {
        let mut conn = HttpConnector::new()
            .connect("svc", "http://127.0.0.1:1")
            .await
            .unwrap();
        let err = conn
            .send(RemoteRequest::ListTools {
                service: "svc".into(),
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(conn.is_broken());
    }
}
