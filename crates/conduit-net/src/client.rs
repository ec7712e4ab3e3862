//! Client that reaches services across the network.
//!
//! Each call runs resolve, breaker check, pool acquire, remote call under a
//! timeout, release and breaker update. Routes (one pool and one breaker per
//! service endpoint) are created the first time a service is addressed.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use conduit_core::wire::{OutputResponse, ResourcesResponse, SchemaResponse, ToolsResponse};
use conduit_core::{
    Client, ConduitError, ConduitResult, Mapping, ResourceContent, normalize_resource_output,
    normalize_tool_output,
};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::NetworkConfig;
use crate::discovery::ServiceDiscovery;
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::transport::{Connector, HttpConnector, RemoteRequest};

struct Route {
    endpoint: String,
    pool: ConnectionPool,
    breaker: Arc<CircuitBreaker>,
}

/// Whether an error says something about the endpoint's health.
///
/// Lookup and validation failures are well-formed answers from a working
/// endpoint and do not count against its breaker.
fn counts_as_failure(err: &ConduitError) -> bool {
    !(err.is_not_found() || matches!(err, ConduitError::Validation { .. }))
}

/// Settles the breaker for one admitted call.
///
/// Dropped unsettled means the caller abandoned the call: the borrowed
/// connection is discarded and the abandonment is recorded as a failure.
struct InFlight {
    service: String,
    breaker: Arc<CircuitBreaker>,
    conn: Option<PooledConnection>,
    settled: bool,
}

impl InFlight {
    fn new(service: &str, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            service: service.to_string(),
            breaker,
            conn: None,
            settled: false,
        }
    }

    fn settle(mut self, failed: bool) {
        self.settled = true;
        if failed {
            self.breaker.record_failure();
        } else {
            self.breaker.record_success();
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(conn) = self.conn.as_mut() {
            conn.mark_broken();
        }
        self.breaker.record_failure();
        warn!(service = %self.service, "Remote call abandoned before completion");
    }
}

/// Network implementation of [`Client`].
pub struct NetworkClient {
    config: NetworkConfig,
    discovery: Arc<ServiceDiscovery>,
    connector: Arc<dyn Connector>,
    routes: Mutex<HashMap<String, Arc<Route>>>,
    closed: AtomicBool,
}

impl NetworkClient {
    /// Create a client using HTTP for both calls and health probes.
    pub fn new(config: NetworkConfig) -> Self {
        let discovery = Arc::new(ServiceDiscovery::new(config.discovery.clone()));
        Self::with_parts(config, discovery, Arc::new(HttpConnector::new()))
    }

    pub fn with_parts(
        config: NetworkConfig,
        discovery: Arc<ServiceDiscovery>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            discovery,
            connector,
            routes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Load configured endpoints and start health probing.
    pub async fn initialize(&self) {
        self.discovery.initialize().await;
    }

    pub fn discovery(&self) -> &Arc<ServiceDiscovery> {
        &self.discovery
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub async fn breaker_state(&self, service: &str) -> Option<BreakerState> {
        self.routes
            .lock()
            .await
            .get(service)
            .map(|r| r.breaker.state())
    }

    pub async fn pool_stats(&self, service: &str) -> Option<PoolStats> {
        self.routes.lock().await.get(service).map(|r| r.pool.stats())
    }

    /// The route for `service`, created or replaced to match the endpoint
    /// discovery currently resolves.
    ///
    /// No I/O happens under the route map lock: pools open their connections
    /// lazily, inside the timed part of a call.
    async fn route(&self, service: &str) -> ConduitResult<Arc<Route>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConduitError::transport(
                service,
                "",
                "network client is closed",
            ));
        }
        let endpoint = self
            .discovery
            .resolve(service)
            .await
            .ok_or_else(|| ConduitError::service_not_found(service))?;

        let mut routes = self.routes.lock().await;
        if let Some(route) = routes.get(service)
            && route.endpoint == endpoint
        {
            return Ok(Arc::clone(route));
        }

        let route = Arc::new(Route {
            endpoint: endpoint.clone(),
            pool: ConnectionPool::new(
                service,
                &endpoint,
                self.config.pool,
                Arc::clone(&self.connector),
            ),
            breaker: Arc::new(CircuitBreaker::new(service, self.config.breaker)),
        });
        if let Some(previous) = routes.insert(service.to_string(), Arc::clone(&route)) {
            debug!(
                service,
                from = %previous.endpoint,
                to = %endpoint,
                "Endpoint changed, replacing route"
            );
            previous.pool.close_all();
        }
        Ok(route)
    }

    /// Run one request: breaker check, then connection acquire and send
    /// under the call timeout, then decode. The breaker records the outcome
    /// once the body is decoded.
    async fn execute<T: DeserializeOwned>(&self, request: RemoteRequest) -> ConduitResult<T> {
        let service = request.service().to_string();
        let route = self.route(&service).await?;

        route.breaker.try_acquire()?;
        let mut flight = InFlight::new(&service, Arc::clone(&route.breaker));

        let timeout = self.config.call_timeout;
        let slot = &mut flight.conn;
        let outcome = tokio::time::timeout(timeout, async {
            let conn = slot.insert(route.pool.get_connection().await?);
            conn.send(request).await
        })
        .await;

        let result = match outcome {
            Ok(Ok(body)) => serde_json::from_value::<T>(body).map_err(|e| {
                ConduitError::transport_with_source(
                    &service,
                    &route.endpoint,
                    "malformed response body",
                    e,
                )
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                if let Some(conn) = flight.conn.as_mut() {
                    conn.mark_broken();
                }
                Err(timed_out(&service, &route.endpoint, timeout))
            }
        };

        flight.settle(result.as_ref().is_err_and(counts_as_failure));
        result
    }
}

fn timed_out(service: &str, endpoint: &str, timeout: Duration) -> ConduitError {
    ConduitError::transport(
        service,
        endpoint,
        format!("call timed out after {}ms", timeout.as_millis()),
    )
}

#[async_trait]
impl Client for NetworkClient {
    async fn call_tool(
        &self,
        service: &str,
        tool: &str,
        input: Option<Mapping>,
    ) -> ConduitResult<Mapping> {
        let response: OutputResponse = self
            .execute(RemoteRequest::CallTool {
                service: service.to_string(),
                tool: tool.to_string(),
                input: input.unwrap_or_default(),
            })
            .await?;
        Ok(normalize_tool_output(response.output))
    }

    async fn get_resource(
        &self,
        service: &str,
        resource: &str,
        params: Option<Mapping>,
    ) -> ConduitResult<ResourceContent> {
        let response: OutputResponse = self
            .execute(RemoteRequest::ReadResource {
                service: service.to_string(),
                resource: resource.to_string(),
                params: params.unwrap_or_default(),
            })
            .await?;
        Ok(normalize_resource_output(response.output))
    }

    async fn get_tool_schema(&self, service: &str, tool: &str) -> ConduitResult<Value> {
        let response: SchemaResponse = self
            .execute(RemoteRequest::ToolSchema {
                service: service.to_string(),
                tool: tool.to_string(),
            })
            .await?;
        Ok(response.schema)
    }

    async fn get_resource_schema(&self, service: &str, resource: &str) -> ConduitResult<Value> {
        let response: SchemaResponse = self
            .execute(RemoteRequest::ResourceSchema {
                service: service.to_string(),
                resource: resource.to_string(),
            })
            .await?;
        Ok(response.schema)
    }

    async fn list_services(&self) -> ConduitResult<Vec<String>> {
        Ok(self.discovery.services().await)
    }

    async fn list_tools(&self, service: &str) -> ConduitResult<Vec<String>> {
        let response: ToolsResponse = self
            .execute(RemoteRequest::ListTools {
                service: service.to_string(),
            })
            .await?;
        Ok(response.tools)
    }

    async fn list_resources(&self, service: &str) -> ConduitResult<Vec<String>> {
        let response: ResourcesResponse = self
            .execute(RemoteRequest::ListResources {
                service: service.to_string(),
            })
            .await?;
        Ok(response.resources)
    }

    /// Stop discovery, close every pool and clear breaker state.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.discovery.close().await;
        let routes: Vec<_> = self.routes.lock().await.drain().collect();
        for (_, route) in &routes {
            route.pool.close_all();
            route.breaker.reset();
        }
        debug!(routes = routes.len(), "Network client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, DiscoveryConfig, PoolConfig};
    use crate::discovery::HealthProbe;
    use crate::transport::Connection;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    struct NoProbe;

    #[async_trait]
    impl HealthProbe for NoProbe {
        async fn probe(&self, _endpoint: &str) -> bool {
            true
        }
    }

    /// Replies from a shared script; an empty script means a hanging call.
    #[derive(Default)]
    struct Scripted {
        replies: Arc<StdMutex<VecDeque<ConduitResult<Value>>>>,
        sends: Arc<AtomicUsize>,
        connects: AtomicUsize,
    }

    struct ScriptedConnection {
        replies: Arc<StdMutex<VecDeque<ConduitResult<Value>>>>,
        sends: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn send(&mut self, _request: RemoteRequest) -> ConduitResult<Value> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(reply) => reply,
                None => std::future::pending().await,
            }
        }
        fn is_broken(&self) -> bool {
            false
        }
    }

    #[async_trait]
    impl Connector for Scripted {
        async fn connect(
            &self,
            _service: &str,
            _endpoint: &str,
        ) -> ConduitResult<Box<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedConnection {
                replies: Arc::clone(&self.replies),
                sends: Arc::clone(&self.sends),
            }))
        }
    }

    fn client(threshold: u32) -> (NetworkClient, Arc<Scripted>) {
        let config = NetworkConfig {
            discovery: DiscoveryConfig::default().with_endpoint("memory", "http://memory:8001"),
            pool: PoolConfig {
                min_size: 0,
                max_size: 2,
            },
            breaker: BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(10),
            },
            call_timeout: Duration::from_secs(1),
        };
        let discovery = Arc::new(ServiceDiscovery::with_probe(
            config.discovery.clone(),
            Arc::new(NoProbe),
        ));
        let connector = Arc::new(Scripted::default());
        let client = NetworkClient::with_parts(config, discovery, connector.clone());
        (client, connector)
    }

    fn push(connector: &Scripted, reply: ConduitResult<Value>) {
        connector.replies.lock().unwrap().push_back(reply);
    }

    #[tokio::test]
    async fn test_unknown_service_is_not_found() {
        let (client, connector) = client(3);
        client.initialize().await;
        let err = client.call_tool("missing", "x", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::ServiceNotFound { .. }));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_call_tool_round_trip() {
        let (client, connector) = client(3);
        client.initialize().await;
        push(&connector, Ok(json!({ "output": { "pong": true } })));
        let out = client.call_tool("memory", "ping", None).await.unwrap();
        assert_eq!(Value::Object(out), json!({ "pong": true }));
        assert_eq!(client.pool_stats("memory").await.unwrap().idle, 1);
        client.close().await;
    }

    #[tokio::test]
    async fn test_breaker_opens_and_short_circuits_without_io() {
        let (client, connector) = client(3);
        client.initialize().await;
        for _ in 0..3 {
            push(
                &connector,
                Err(ConduitError::transport("memory", "http://memory:8001", "refused")),
            );
            let err = client.call_tool("memory", "store", None).await.unwrap_err();
            assert!(matches!(err, ConduitError::Transport { .. }));
        }
        assert_eq!(client.breaker_state("memory").await, Some(BreakerState::Open));

        let sends = connector.sends.load(Ordering::SeqCst);
        let connects = connector.connects.load(Ordering::SeqCst);
        let err = client.call_tool("memory", "store", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::ServiceUnavailable { .. }));
        assert_eq!(connector.sends.load(Ordering::SeqCst), sends);
        assert_eq!(connector.connects.load(Ordering::SeqCst), connects);
        client.close().await;
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_trip_breaker() {
        let (client, connector) = client(1);
        client.initialize().await;
        push(
            &connector,
            Err(ConduitError::validation("memory", "store", "missing key")),
        );
        let err = client.call_tool("memory", "store", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::Validation { .. }));
        assert_eq!(client.breaker_state("memory").await, Some(BreakerState::Closed));
        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let (client, _connector) = client(1);
        client.initialize().await;
        let err = client.call_tool("memory", "slow", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::Transport { .. }));
        assert_eq!(client.breaker_state("memory").await, Some(BreakerState::Open));
        assert_eq!(client.pool_stats("memory").await.unwrap().total, 0);
        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_records_failure_and_frees_connection() {
        let (client, _connector) = client(1);
        let client = Arc::new(client);
        client.initialize().await;

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call_tool("memory", "slow", None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        call.abort();
        let _ = call.await;

        assert_eq!(client.breaker_state("memory").await, Some(BreakerState::Open));
        let stats = client.pool_stats("memory").await.unwrap();
        assert_eq!(stats.borrowed, 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_route_follows_endpoint_change() {
        let (client, connector) = client(3);
        client.initialize().await;
        push(&connector, Ok(json!({ "tools": ["a"] })));
        client.list_tools("memory").await.unwrap();

        client
            .discovery()
            .register("memory", "http://memory-2:8001")
            .await;
        push(&connector, Ok(json!({ "tools": ["b"] })));
        assert_eq!(client.list_tools("memory").await.unwrap(), vec!["b"]);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        client.close().await;
    }

    #[tokio::test]
    async fn test_malformed_success_body_counts_as_failure() {
        let (client, connector) = client(1);
        client.initialize().await;
        push(&connector, Ok(json!({ "tools": "not-a-list" })));
        let err = client.list_tools("memory").await.unwrap_err();
        assert!(matches!(err, ConduitError::Transport { .. }));
        assert!(err.to_string().contains("malformed response body"));
        assert_eq!(client.breaker_state("memory").await, Some(BreakerState::Open));
        client.close().await;
    }

    /// Connects hang for one endpoint and succeed for every other.
    struct StallsOn {
        endpoint: &'static str,
        inner: Scripted,
    }

    #[async_trait]
    impl Connector for StallsOn {
        async fn connect(
            &self,
            service: &str,
            endpoint: &str,
        ) -> ConduitResult<Box<dyn Connection>> {
            if endpoint == self.endpoint {
                return std::future::pending().await;
            }
            self.inner.connect(service, endpoint).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_endpoint_does_not_block_other_services() {
        let config = NetworkConfig {
            discovery: DiscoveryConfig::default()
                .with_endpoint("a", "http://slow")
                .with_endpoint("b", "http://fast"),
            pool: PoolConfig {
                min_size: 1,
                max_size: 2,
            },
            breaker: BreakerConfig::default(),
            call_timeout: Duration::from_secs(1),
        };
        let discovery = Arc::new(ServiceDiscovery::with_probe(
            config.discovery.clone(),
            Arc::new(NoProbe),
        ));
        let connector = Arc::new(StallsOn {
            endpoint: "http://slow",
            inner: Scripted::default(),
        });
        let client = Arc::new(NetworkClient::with_parts(
            config,
            discovery,
            connector.clone(),
        ));
        client.initialize().await;

        let stuck = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.list_tools("a").await })
        };
        tokio::task::yield_now().await;

        push(&connector.inner, Ok(json!({ "tools": ["get"] })));
        let tools = client.list_tools("b").await.unwrap();
        assert_eq!(tools, vec!["get"]);

        let err = stuck.await.unwrap().unwrap_err();
        assert!(matches!(err, ConduitError::Transport { .. }));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(client.pool_stats("a").await.unwrap().total, 0);
        client.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_calls() {
        let (client, _) = client(3);
        client.initialize().await;
        client.close().await;
        client.close().await;
        assert!(!client.discovery().is_running().await);
        let err = client.call_tool("memory", "ping", None).await.unwrap_err();
        assert!(matches!(err, ConduitError::Transport { .. }));
    }
}
