//! Runs a real service host on an ephemeral local port.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use conduit_core::OperationRegistry;
use conduit_host::{HostError, ServiceHost};

/// A service host bound to `127.0.0.1:0`, stopped on [`shutdown`](Self::shutdown).
pub struct TestHost {
    address: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), HostError>>>,
}

impl TestHost {
    /// Bind and start serving `registry`.
    pub async fn start(registry: Arc<OperationRegistry>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();

        let host = ServiceHost::new(registry);
        let handle = tokio::spawn(host.serve(listener, async move {
            let _ = stopped.await;
        }));

        Ok(Self {
            address,
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Base URL of the host, e.g. `http://127.0.0.1:40123`.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.address)
    }

    /// Stop serving and wait for the server task to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
