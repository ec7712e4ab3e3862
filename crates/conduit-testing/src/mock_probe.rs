//! Health probe answering from a table instead of the network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use conduit_net::HealthProbe;

/// Scripted [`HealthProbe`]. Endpoints not in the table are reported dead.
#[derive(Clone, Default)]
pub struct MockHealthProbe {
    alive: Arc<Mutex<HashMap<String, bool>>>,
    probes: Arc<AtomicUsize>,
}

impl MockHealthProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the answer for an endpoint.
    pub fn set(&self, endpoint: impl Into<String>, alive: bool) {
        self.alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint.into(), alive);
    }

    /// Number of probes answered so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for MockHealthProbe {
    async fn probe(&self, endpoint: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .copied()
            .unwrap_or(false)
    }
}
