//! Per-endpoint circuit breaker.
//!
//! Closed passes calls and counts consecutive failures. Reaching the
//! threshold opens the circuit; calls are then rejected without touching the
//! network. Once the recovery timeout has elapsed since the last failure the
//! next call is admitted as a single half-open probe, whose outcome either
//! closes the circuit or re-opens it with a fresh timer.
//!
//! A success while closed resets the failure count, so only an unbroken run
//! of failures trips the circuit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use conduit_core::{ConduitError, ConduitResult};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Failure tracker guarding one endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    fn remaining(&self, inner: &Inner, now: Instant) -> Duration {
        inner
            .last_failure
            .map(|at| self.config.recovery_timeout.saturating_sub(now.duration_since(at)))
            .unwrap_or_default()
    }

    /// Ask to place a call.
    ///
    /// Fails with [`ConduitError::ServiceUnavailable`] while the circuit is
    /// open, or while a half-open probe is already in flight. An admitted
    /// call must be settled with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> ConduitResult<()> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| now.duration_since(at))
                    .unwrap_or(Duration::MAX);
                if elapsed > self.config.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(service = %self.service, "Circuit half-open, admitting probe call");
                    Ok(())
                } else {
                    Err(ConduitError::service_unavailable(
                        &self.service,
                        self.remaining(&inner, now),
                    ))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ConduitError::service_unavailable(
                        &self.service,
                        Duration::ZERO,
                    ))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => inner.failures = 0,
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failures = 0;
                inner.last_failure = None;
                inner.probe_in_flight = false;
                info!(service = %self.service, "Circuit closed after successful probe");
            }
            // A call admitted before the circuit opened; the open timer stands.
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failures = inner.failures.saturating_add(1);
                inner.last_failure = Some(now);
                if inner.failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    warn!(
                        service = %self.service,
                        failures = inner.failures,
                        recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.failures = self.config.failure_threshold;
                inner.last_failure = Some(now);
                inner.probe_in_flight = false;
                warn!(service = %self.service, "Probe call failed, circuit re-opened");
            }
            BreakerState::Open => {}
        }
    }

    /// Return to closed with a zero failure count.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let was = inner.state;
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        if was != BreakerState::Closed {
            info!(service = %self.service, from = %was, "Circuit reset");
        }
    }
}
