//! Service discovery with a background health-probe loop.
//!
//! Discovery maps service names to endpoint URLs. Records are created on
//! registration with unknown health and are kept until shutdown. A
//! background task probes every endpoint each interval; a probe that
//! succeeds marks the endpoint healthy, anything else marks it unhealthy.
//! Unhealthy endpoints stay resolvable, so callers decide whether to avoid
//! them.
//!
//! Health flips are logged and published as [`DiscoveryEvent`]s on a
//! broadcast channel.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;

// ============================================================================
// Core Types
// ============================================================================

/// Health of a registered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Not probed since registration
    Unknown,
    /// Last probe succeeded
    Healthy,
    /// Last probe failed
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A service name bound to its endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub service: String,
    pub address: String,
    pub health: HealthStatus,
}

/// Events emitted by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// An endpoint was added or replaced.
    Registered { service: String, address: String },
    /// A probe changed an endpoint's health.
    HealthChanged {
        service: String,
        address: String,
        old_status: HealthStatus,
        new_status: HealthStatus,
    },
}

/// Liveness check against one endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the endpoint reports itself alive.
    async fn probe(&self, endpoint: &str) -> bool;
}

/// Probes `GET {endpoint}/health`; only HTTP 200 counts as alive.
#[derive(Debug, Clone, Default)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, endpoint: &str) -> bool {
        let url = format!("{}/health", endpoint.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(url = %url, error = %e, "Health probe request failed");
                false
            }
        }
    }
}

// ============================================================================
// Discovery Service
// ============================================================================

struct State {
    records: RwLock<BTreeMap<String, EndpointRecord>>,
    events: broadcast::Sender<DiscoveryEvent>,
    probe: Arc<dyn HealthProbe>,
    probe_timeout: Duration,
}

impl State {
    fn emit(&self, event: DiscoveryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn probe_all(&self) {
        let targets: Vec<(String, String)> = self
            .records
            .read()
            .await
            .values()
            .map(|r| (r.service.clone(), r.address.clone()))
            .collect();

        let probes = targets.iter().map(|(_, address)| async move {
            matches!(
                tokio::time::timeout(self.probe_timeout, self.probe.probe(address)).await,
                Ok(true)
            )
        });
        let results = join_all(probes).await;

        let mut records = self.records.write().await;
        for ((service, address), alive) in targets.into_iter().zip(results) {
            let Some(record) = records.get_mut(&service) else {
                continue;
            };
            // Re-registered to a different endpoint while probing.
            if record.address != address {
                continue;
            }
            let new_status = if alive {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            };
            let old_status = record.health;
            record.health = new_status;
            if old_status == new_status {
                continue;
            }

            if alive {
                info!(
                    service = %service,
                    endpoint = %address,
                    from = %old_status,
                    "Service healthy"
                );
            } else {
                warn!(
                    service = %service,
                    endpoint = %address,
                    from = %old_status,
                    "Service unhealthy"
                );
            }
            self.emit(DiscoveryEvent::HealthChanged {
                service,
                address,
                old_status,
                new_status,
            });
        }
    }
}

/// Maps service names to endpoints and tracks their health.
pub struct ServiceDiscovery {
    config: DiscoveryConfig,
    state: Arc<State>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ServiceDiscovery {
    /// Create a discovery service probing over HTTP.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_probe(config, Arc::new(HttpHealthProbe::new()))
    }

    pub fn with_probe(config: DiscoveryConfig, probe: Arc<dyn HealthProbe>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Arc::new(State {
                records: RwLock::new(BTreeMap::new()),
                events,
                probe,
                probe_timeout: config.probe_timeout,
            }),
            config,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.state.events.subscribe()
    }

    /// Load the configured endpoints and start the probe loop.
    ///
    /// Calling it while the loop is running only reloads the endpoints.
    pub async fn initialize(&self) {
        for (service, address) in &self.config.endpoints {
            self.register(service, address).await;
        }

        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let state = Arc::clone(&self.state);
        let interval = self.config.probe_interval;
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = async {
                        ticker.tick().await;
                        state.probe_all().await;
                    } => {}
                }
            }
            debug!("Health probe loop stopped");
        });

        info!(
            services = self.config.endpoints.len(),
            interval_ms = interval.as_millis() as u64,
            "Service discovery started"
        );
        *task = Some((token, handle));
    }

    /// Add or overwrite an endpoint mapping. Health starts unknown.
    pub async fn register(&self, service: impl Into<String>, address: impl Into<String>) {
        let service = service.into();
        let address = address.into();
        self.state.records.write().await.insert(
            service.clone(),
            EndpointRecord {
                service: service.clone(),
                address: address.clone(),
                health: HealthStatus::Unknown,
            },
        );
        info!(service = %service, endpoint = %address, "Registered service endpoint");
        self.state
            .emit(DiscoveryEvent::Registered { service, address });
    }

    pub async fn resolve(&self, service: &str) -> Option<String> {
        self.state
            .records
            .read()
            .await
            .get(service)
            .map(|r| r.address.clone())
    }

    /// False for unregistered services and for unknown health.
    pub async fn is_healthy(&self, service: &str) -> bool {
        self.health(service).await == Some(HealthStatus::Healthy)
    }

    pub async fn health(&self, service: &str) -> Option<HealthStatus> {
        self.state
            .records
            .read()
            .await
            .get(service)
            .map(|r| r.health)
    }

    pub async fn get_healthy_services(&self) -> Vec<String> {
        self.state
            .records
            .read()
            .await
            .values()
            .filter(|r| r.health == HealthStatus::Healthy)
            .map(|r| r.service.clone())
            .collect()
    }

    /// Every registered service, in name order.
    pub async fn services(&self) -> Vec<String> {
        self.state.records.read().await.keys().cloned().collect()
    }

    pub async fn records(&self) -> Vec<EndpointRecord> {
        self.state.records.read().await.values().cloned().collect()
    }

    /// Run one probe round now.
    pub async fn probe_now(&self) {
        self.state.probe_all().await;
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Stop the probe loop and wait for it to exit.
    ///
    /// Safe to call if the loop was never started or is already stopped.
    pub async fn close(&self) {
        let Some((token, handle)) = self.task.lock().await.take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await
            && e.is_panic()
        {
            warn!(error = %e, "Health probe loop panicked");
        }
        info!("Service discovery stopped");
    }
}

impl Drop for ServiceDiscovery {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.try_lock()
            && let Some((token, _)) = task.take()
        {
            token.cancel();
        }
    }
}
