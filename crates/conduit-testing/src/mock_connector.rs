//! # Mock Connector for Testing
//!
//! A [`Connector`] whose connections answer from a shared script instead of
//! the network, and which counts every connect and send.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use conduit_core::wire::WireError;
use conduit_core::{ConduitError, ConduitResult};
use conduit_net::{Connection, Connector, RemoteRequest};

/// What a scripted send does.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with this response body.
    Reply(Value),
    /// Fail at the transport level and break the connection.
    TransportFailure(String),
    /// Fail with an error body returned by the remote end.
    Remote(WireError),
    /// Never complete.
    Hang,
}

#[derive(Default)]
struct Script {
    queue: VecDeque<MockOutcome>,
    fallback: Option<MockOutcome>,
    history: Vec<RemoteRequest>,
    refuse_connect: bool,
}

/// Scripted connector.
///
/// Outcomes are consumed in order by whichever connection sends next; once
/// the queue is empty the fallback is used, or the call hangs if none is set.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
    connects: Arc<AtomicUsize>,
    sends: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue one outcome.
    pub fn push(&self, outcome: MockOutcome) -> &Self {
        self.script().queue.push_back(outcome);
        self
    }

    /// Queue a successful reply.
    pub fn reply(&self, body: Value) -> &Self {
        self.push(MockOutcome::Reply(body))
    }

    /// Queue a transport failure.
    pub fn fail(&self, message: impl Into<String>) -> &Self {
        self.push(MockOutcome::TransportFailure(message.into()))
    }

    /// Outcome used when the queue is empty.
    pub fn with_fallback(self, outcome: MockOutcome) -> Self {
        self.script().fallback = Some(outcome);
        self
    }

    /// Make every connect attempt fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.script().refuse_connect = refuse;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// Connect and send attempts combined.
    pub fn network_attempts(&self) -> usize {
        self.connect_count() + self.send_count()
    }

    /// Every request sent so far.
    pub fn history(&self) -> Vec<RemoteRequest> {
        self.script().history.clone()
    }

    /// Reset counters and history. The script is kept.
    pub fn reset(&self) {
        self.connects.store(0, Ordering::SeqCst);
        self.sends.store(0, Ordering::SeqCst);
        self.script().history.clear();
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, service: &str, endpoint: &str) -> ConduitResult<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.script().refuse_connect {
            return Err(ConduitError::transport(service, endpoint, "connection refused"));
        }
        Ok(Box::new(MockConnection {
            owner: self.clone(),
            endpoint: endpoint.to_string(),
            broken: false,
        }))
    }
}

struct MockConnection {
    owner: MockConnector,
    endpoint: String,
    broken: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, request: RemoteRequest) -> ConduitResult<Value> {
        self.owner.sends.fetch_add(1, Ordering::SeqCst);
        let service = request.service().to_string();
        let outcome = {
            let mut script = self.owner.script();
            script.history.push(request);
            script.queue.pop_front().or_else(|| script.fallback.clone())
        };

        match outcome {
            Some(MockOutcome::Reply(body)) => Ok(body),
            Some(MockOutcome::TransportFailure(message)) => {
                self.broken = true;
                Err(ConduitError::transport(service, &self.endpoint, message))
            }
            Some(MockOutcome::Remote(wire)) => Err(wire.into_error(&self.endpoint)),
            Some(MockOutcome::Hang) | None => std::future::pending().await,
        }
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    fn close(&mut self) {
        self.broken = true;
    }
}
