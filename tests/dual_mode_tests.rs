//! End-to-end tests driving the same services in-process and over HTTP.
//!
//! Every scenario runs against both clients and must produce the same output
//! or the same error kind.

use conduit_core::{Client, ConduitError, ErrorKind, InProcessClient, Mapping, OperationRegistry};
use conduit_net::{DiscoveryConfig, NetworkClient, NetworkConfig};
use conduit_testing::{EchoService, MemoryService, TestHost};
use serde_json::{Value, json};
use std::error::Error as _;
use std::sync::Arc;

fn registry() -> Arc<OperationRegistry> {
    let registry = Arc::new(OperationRegistry::new());
    registry
        .register("echo", EchoService::new())
        .expect("echo registers");
    registry
        .register("memory", MemoryService::new())
        .expect("memory registers");
    registry
}

/// An in-process client and a network client reaching a host that serves an
/// independent copy of the same services.
struct Pair {
    local: InProcessClient,
    remote: NetworkClient,
    host: TestHost,
}

impl Pair {
    async fn start() -> Self {
        let host = TestHost::start(registry()).await.expect("host starts");
        let config = NetworkConfig {
            discovery: DiscoveryConfig::default()
                .with_endpoint("echo", host.endpoint())
                .with_endpoint("memory", host.endpoint()),
            ..Default::default()
        };
        let remote = NetworkClient::new(config);
        remote.initialize().await;

        Self {
            local: InProcessClient::new(registry()),
            remote,
            host,
        }
    }

    fn clients(&self) -> [(&'static str, &dyn Client); 2] {
        [("in_process", &self.local), ("network", &self.remote)]
    }

    async fn stop(self) {
        self.remote.close().await;
        self.host.shutdown().await;
    }
}

fn input(value: Value) -> Option<Mapping> {
    value.as_object().cloned()
}

#[tokio::test]
async fn test_ping_returns_pong_in_both_modes() {
    let pair = Pair::start().await;
    for (mode, client) in pair.clients() {
        let output = client
            .call_tool("echo", "ping", Some(Mapping::new()))
            .await
            .unwrap_or_else(|e| panic!("{mode}: {e}"));
        assert_eq!(Value::Object(output), json!({ "pong": true }), "{mode}");
    }
    pair.stop().await;
}

#[tokio::test]
async fn test_missing_service_is_service_not_found() {
    let pair = Pair::start().await;
    for (mode, client) in pair.clients() {
        let err = client.call_tool("missing", "x", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceNotFound, "{mode}");

        let err = client.list_tools("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceNotFound, "{mode}");
    }
    pair.stop().await;
}

#[tokio::test]
async fn test_missing_operation_names_the_operation() {
    let pair = Pair::start().await;
    for (mode, client) in pair.clients() {
        let err = client.call_tool("echo", "nope", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotFound, "{mode}");

        let err = client.get_resource("echo", "nope", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound, "{mode}");

        let err = client.get_tool_schema("echo", "nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotFound, "{mode}");
    }
    pair.stop().await;
}

#[tokio::test]
async fn test_raising_tool_wraps_original_message() {
    let pair = Pair::start().await;
    for (mode, client) in pair.clients() {
        let err = client.call_tool("echo", "fail", None).await.unwrap_err();
        assert!(
            matches!(&err, ConduitError::ToolExecution { service, tool, .. }
                if service == "echo" && tool == "fail"),
            "{mode}: {err:?}"
        );
        let cause = err.source().map(ToString::to_string);
        assert_eq!(cause.as_deref(), Some("echo failure requested"), "{mode}");
    }
    pair.stop().await;
}

#[tokio::test]
async fn test_validation_errors_match() {
    let pair = Pair::start().await;
    for (mode, client) in pair.clients() {
        let err = client
            .call_tool("memory", "store", input(json!({ "key": "a" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError, "{mode}");

        let err = client
            .call_tool("memory", "store", input(json!({ "key": "", "value": 1 })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError, "{mode}");
    }
    pair.stop().await;
}

#[tokio::test]
async fn test_store_and_read_back() {
    let pair = Pair::start().await;
    for (mode, client) in pair.clients() {
        client
            .call_tool(
                "memory",
                "store",
                input(json!({ "key": "topic", "value": "rust" })),
            )
            .await
            .unwrap_or_else(|e| panic!("{mode}: {e}"));

        let recalled = client
            .get_resource("memory", "recall", input(json!({ "key": "topic" })))
            .await
            .unwrap_or_else(|e| panic!("{mode}: {e}"));
        assert_eq!(recalled.into_value(), json!({ "result": "rust" }), "{mode}");

        let rows = client
            .get_resource("memory", "entries", None)
            .await
            .unwrap_or_else(|e| panic!("{mode}: {e}"));
        assert_eq!(
            rows.into_value(),
            json!([{ "key": "topic", "value": "rust" }]),
            "{mode}"
        );

        let cleared = client
            .call_tool("memory", "clear", None)
            .await
            .unwrap_or_else(|e| panic!("{mode}: {e}"));
        assert!(cleared.is_empty(), "{mode}");
    }
    pair.stop().await;
}

#[tokio::test]
async fn test_schemas_and_listings_match() {
    let pair = Pair::start().await;

    let local_schema = pair.local.get_tool_schema("memory", "store").await.unwrap();
    let remote_schema = pair.remote.get_tool_schema("memory", "store").await.unwrap();
    assert_eq!(local_schema, remote_schema);

    let local_schema = pair
        .local
        .get_resource_schema("echo", "greeting")
        .await
        .unwrap();
    let remote_schema = pair
        .remote
        .get_resource_schema("echo", "greeting")
        .await
        .unwrap();
    assert_eq!(local_schema, remote_schema);

    for service in ["echo", "memory"] {
        assert_eq!(
            pair.local.list_tools(service).await.unwrap(),
            pair.remote.list_tools(service).await.unwrap()
        );
        assert_eq!(
            pair.local.list_resources(service).await.unwrap(),
            pair.remote.list_resources(service).await.unwrap()
        );
    }

    assert_eq!(
        pair.local.list_services().await.unwrap(),
        pair.remote.list_services().await.unwrap()
    );
    pair.stop().await;
}

#[tokio::test]
async fn test_concurrent_calls_share_bounded_pool() {
    let host = TestHost::start(registry()).await.expect("host starts");
    let config = NetworkConfig {
        discovery: DiscoveryConfig::default().with_endpoint("echo", host.endpoint()),
        pool: conduit_net::PoolConfig {
            min_size: 0,
            max_size: 2,
        },
        ..Default::default()
    };
    let client = Arc::new(NetworkClient::new(config));
    client.initialize().await;

    let calls = (0..16).map(|i| {
        let client = Arc::clone(&client);
        async move {
            client
                .call_tool("echo", "echo", input(json!({ "n": i })))
                .await
        }
    });
    let results = futures::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap().get("n"), Some(&json!(i)));
    }

    let stats = client.pool_stats("echo").await.expect("route exists");
    assert!(stats.total <= 2, "{stats:?}");
    assert_eq!(stats.borrowed, 0);

    client.close().await;
    host.shutdown().await;
}
