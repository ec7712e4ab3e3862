//! Bounded per-endpoint connection pool.
//!
//! Capacity is a FIFO semaphore with `max_size` permits. Every borrowed or
//! in-creation connection holds a permit; idle connections do not. A new
//! connection is only opened by a permit holder that found the idle set
//! empty, which keeps the number of open connections at or below `max_size`.
//! Borrowers beyond that wait on the semaphore until a release.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use conduit_core::{ConduitError, ConduitResult};

use crate::config::PoolConfig;
use crate::transport::{Connection, Connector, RemoteRequest};

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub borrowed: usize,
    pub total: usize,
    pub max: usize,
}

struct Shared {
    idle: Mutex<VecDeque<Box<dyn Connection>>>,
    total: AtomicUsize,
    closed: AtomicBool,
}

impl Shared {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Box<dyn Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn discard(&self, mut conn: Box<dyn Connection>) {
        conn.close();
        self.total.fetch_sub(1, Ordering::SeqCst);
    }

    /// Put a connection back, or tear it down if it cannot be reused.
    fn give_back(&self, conn: Box<dyn Connection>, broken: bool) {
        if broken || conn.is_broken() || self.closed.load(Ordering::SeqCst) {
            self.discard(conn);
            return;
        }
        self.idle().push_back(conn);
        // close_all may have drained between the check and the push.
        if self.closed.load(Ordering::SeqCst) {
            let drained: Vec<_> = self.idle().drain(..).collect();
            for conn in drained {
                self.discard(conn);
            }
        }
    }
}

/// Counts a connection while it is being opened.
///
/// Released unless [`keep`](Self::keep) is called, so a failed or abandoned
/// connect gives its slot back.
struct Reservation<'a> {
    total: &'a AtomicUsize,
    kept: bool,
}

impl<'a> Reservation<'a> {
    fn new(total: &'a AtomicUsize) -> Self {
        total.fetch_add(1, Ordering::SeqCst);
        Self { total, kept: false }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.total.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Pool of reusable connections to one endpoint.
pub struct ConnectionPool {
    service: String,
    endpoint: String,
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    permits: Arc<Semaphore>,
    shared: Arc<Shared>,
}

impl ConnectionPool {
    pub fn new(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        config: PoolConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let max = config.max_size.max(1);
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            config: PoolConfig {
                min_size: config.min_size.min(max),
                max_size: max,
            },
            connector,
            permits: Arc::new(Semaphore::new(max)),
            shared: Arc::new(Shared {
                idle: Mutex::new(VecDeque::new()),
                total: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn closed_error(&self) -> ConduitError {
        ConduitError::transport(&self.service, &self.endpoint, "connection pool is closed")
    }

    async fn open(&self) -> ConduitResult<Box<dyn Connection>> {
        let reservation = Reservation::new(&self.shared.total);
        let conn = self
            .connector
            .connect(&self.service, &self.endpoint)
            .await?;
        reservation.keep();
        debug!(
            service = %self.service,
            endpoint = %self.endpoint,
            total = self.shared.total.load(Ordering::SeqCst),
            "Opened pooled connection"
        );
        Ok(conn)
    }

    /// Open idle connections until the pool holds `min_size`.
    ///
    /// Only uses capacity that is free right now, so it never waits.
    async fn fill_to_min(&self) -> ConduitResult<()> {
        while self.shared.total.load(Ordering::SeqCst) < self.config.min_size {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let conn = self.open().await?;
            self.shared.give_back(conn, false);
            drop(permit);
        }
        Ok(())
    }

    /// Eagerly open `min_size` connections.
    pub async fn initialize(&self) -> ConduitResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }
        self.fill_to_min().await
    }

    /// Borrow a connection, waiting for a release when the pool is at
    /// capacity.
    pub async fn get_connection(&self) -> ConduitResult<PooledConnection> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| self.closed_error())?;

        // Lazy repair after broken connections were discarded.
        if let Err(e) = self.fill_to_min().await {
            warn!(
                service = %self.service,
                endpoint = %self.endpoint,
                error = %e,
                "Failed to restore pool minimum"
            );
        }

        let reused = loop {
            let next = self.shared.idle().pop_front();
            match next {
                Some(conn) if conn.is_broken() => self.shared.discard(conn),
                other => break other,
            }
        };
        let conn = match reused {
            Some(conn) => conn,
            None => self.open().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            broken: false,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Return a borrowed connection. Equivalent to dropping it.
    pub fn release_connection(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Close every connection and reject further borrowing.
    ///
    /// Idle connections are closed now; borrowed ones are closed when their
    /// borrower releases them. Waiting borrowers fail. Safe to call more
    /// than once.
    pub fn close_all(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        let drained: Vec<_> = self.shared.idle().drain(..).collect();
        let count = drained.len();
        for conn in drained {
            self.shared.discard(conn);
        }
        debug!(
            service = %self.service,
            endpoint = %self.endpoint,
            closed = count,
            "Closed connection pool"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.shared.idle().len();
        let total = self.shared.total.load(Ordering::SeqCst);
        PoolStats {
            idle,
            borrowed: total.saturating_sub(idle),
            total,
            max: self.config.max_size,
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("service", &self.service)
            .field("endpoint", &self.endpoint)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A connection borrowed from a [`ConnectionPool`].
///
/// Released back to the pool on drop; discarded instead if it was marked
/// broken, reports itself broken, or the pool has been closed.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    broken: bool,
    shared: Arc<Shared>,
    // Dropped after `drop` has returned the connection.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub async fn send(&mut self, request: RemoteRequest) -> ConduitResult<serde_json::Value> {
        match self.conn.as_mut() {
            Some(conn) => conn.send(request).await,
            None => Err(ConduitError::transport(
                request.service(),
                "",
                "connection already released",
            )),
        }
    }

    /// Discard this connection on release instead of returning it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken || self.conn.as_ref().is_none_or(|c| c.is_broken())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.give_back(conn, self.broken);
        }
    }
}
