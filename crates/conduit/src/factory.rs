//! Selects and memoises the client for the configured deployment mode.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use conduit_core::{Client, InProcessClient, OperationRegistry};
use conduit_net::{Connector, HealthProbe, NetworkClient, ServiceDiscovery};

use crate::config::{DeploymentMode, RuntimeConfig};

/// Collaborators substituted for the HTTP defaults in distributed mode.
#[derive(Clone)]
struct Transport {
    connector: Arc<dyn Connector>,
    probe: Arc<dyn HealthProbe>,
}

#[derive(Clone)]
enum Active {
    InProcess(Arc<InProcessClient>),
    Network(Arc<NetworkClient>),
}

impl Active {
    fn client(&self) -> Arc<dyn Client> {
        match self {
            Active::InProcess(client) => Arc::clone(client) as Arc<dyn Client>,
            Active::Network(client) => Arc::clone(client) as Arc<dyn Client>,
        }
    }
}

/// Owns the one client of a process.
///
/// The mode is fixed at construction. [`client`](Self::client) builds the
/// client on first use and returns the same instance afterwards until
/// [`shutdown`](Self::shutdown) clears it.
pub struct ClientFactory {
    config: RuntimeConfig,
    registry: Arc<OperationRegistry>,
    transport: Option<Transport>,
    active: Mutex<Option<Active>>,
}

impl ClientFactory {
    pub fn new(config: RuntimeConfig, registry: Arc<OperationRegistry>) -> Self {
        Self {
            config,
            registry,
            transport: None,
            active: Mutex::new(None),
        }
    }

    /// Use `connector` and `probe` instead of HTTP in distributed mode.
    #[must_use]
    pub fn with_transport(
        mut self,
        connector: Arc<dyn Connector>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        self.transport = Some(Transport { connector, probe });
        self
    }

    pub fn mode(&self) -> DeploymentMode {
        self.config.mode
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// The process client, created on first call.
    pub async fn client(&self) -> Arc<dyn Client> {
        self.active().await.client()
    }

    /// The network client when running distributed.
    pub async fn network_client(&self) -> Option<Arc<NetworkClient>> {
        match self.active().await {
            Active::Network(client) => Some(client),
            Active::InProcess(_) => None,
        }
    }

    /// Whether a client is currently memoised.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Close the memoised client and forget it.
    ///
    /// A later [`client`](Self::client) call builds a fresh one.
    pub async fn shutdown(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.client().close().await;
            info!(mode = %self.config.mode, "Client shut down");
        }
    }

    async fn active(&self) -> Active {
        let mut slot = self.active.lock().await;
        if let Some(active) = slot.as_ref() {
            return active.clone();
        }

        let active = match self.config.mode {
            DeploymentMode::InProcess => {
                Active::InProcess(Arc::new(InProcessClient::new(Arc::clone(&self.registry))))
            }
            DeploymentMode::Distributed => {
                let network = self.config.network();
                let client = match &self.transport {
                    Some(transport) => {
                        let discovery = Arc::new(ServiceDiscovery::with_probe(
                            network.discovery.clone(),
                            Arc::clone(&transport.probe),
                        ));
                        NetworkClient::with_parts(
                            network,
                            discovery,
                            Arc::clone(&transport.connector),
                        )
                    }
                    None => NetworkClient::new(network),
                };
                client.initialize().await;
                Active::Network(Arc::new(client))
            }
        };

        info!(mode = %self.config.mode, "Client created");
        *slot = Some(active.clone());
        active
    }
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("mode", &self.config.mode)
            .field("services", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfigBuilder;
    use conduit_testing::{EchoService, MockConnector, MockHealthProbe};
    use serde_json::json;

    fn registry() -> Arc<OperationRegistry> {
        let registry = Arc::new(OperationRegistry::new());
        registry.register("echo", EchoService::new()).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_in_process_mode_calls_registry() {
        let config = RuntimeConfigBuilder::new().build().unwrap();
        let factory = ClientFactory::new(config, registry());

        let client = factory.client().await;
        let output = client.call_tool("echo", "ping", None).await.unwrap();
        assert_eq!(output.get("pong"), Some(&json!(true)));
        assert!(factory.network_client().await.is_none());
    }

    #[tokio::test]
    async fn test_client_is_memoised_until_shutdown() {
        let config = RuntimeConfigBuilder::new().build().unwrap();
        let factory = ClientFactory::new(config, registry());

        let first = factory.client().await;
        let second = factory.client().await;
        assert!(Arc::ptr_eq(&first, &second));

        factory.shutdown().await;
        assert!(!factory.is_active().await);

        let third = factory.client().await;
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_distributed_mode_uses_network_client() {
        let config = RuntimeConfigBuilder::new()
            .mode(DeploymentMode::Distributed)
            .endpoint("echo", "http://echo.test")
            .build()
            .unwrap();
        let connector = MockConnector::new();
        connector.reply(json!({ "output": { "pong": true } }));
        let probe = MockHealthProbe::new();
        probe.set("http://echo.test", true);

        let factory = ClientFactory::new(config, registry())
            .with_transport(Arc::new(connector.clone()), Arc::new(probe));

        let network = factory.network_client().await.unwrap();
        assert_eq!(
            network.discovery().resolve("echo").await.as_deref(),
            Some("http://echo.test")
        );

        let output = factory
            .client()
            .await
            .call_tool("echo", "ping", None)
            .await
            .unwrap();
        assert_eq!(output.get("pong"), Some(&json!(true)));
        assert!(connector.send_count() >= 1);

        factory.shutdown().await;
        assert!(!network.discovery().is_running().await);
    }

    #[tokio::test]
    async fn test_shutdown_without_client_is_noop() {
        let config = RuntimeConfigBuilder::new().build().unwrap();
        let factory = ClientFactory::new(config, registry());
        factory.shutdown().await;
        assert!(!factory.is_active().await);
    }
}
