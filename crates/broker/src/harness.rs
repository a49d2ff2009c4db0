//! Server harness: port validation and idempotent start/stop.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::listener;
use crate::registry::ConnectionRegistry;

/// Lowest port this harness will bind.
pub const MIN_PORT: u16 = 1024;
/// Highest port this harness will bind.
pub const MAX_PORT: u16 = 49151;
/// Port used when no override is configured.
pub const DEFAULT_PORT: u16 = 23048;

/// Error returned by [`ServerHarness::start`].
#[derive(Debug, Error)]
pub enum StartError {
    /// The requested port fell outside `[MIN_PORT, MAX_PORT]`.
    #[error("port {0} is outside the allowed range {MIN_PORT}..={MAX_PORT}")]
    InvalidPort(u16),
    /// Binding the listening socket failed.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Returns whether `port` is an allowed value for this broker to bind.
pub fn validate_port(port: u16) -> bool {
    (MIN_PORT..=MAX_PORT).contains(&port)
}

struct Running {
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// Owns the broker's listening socket lifecycle.
///
/// `start`/`stop` are both idempotent: starting an already-running harness
/// logs a warning and is a no-op; stopping an already-stopped harness is a
/// silent no-op.
pub struct ServerHarness {
    registry: Arc<ConnectionRegistry>,
    running: Mutex<Option<Running>>,
}

impl ServerHarness {
    /// Creates a harness with a fresh, empty connection registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            running: Mutex::new(None),
        }
    }

    /// The registry backing this harness, for inspection in tests or by a
    /// management interface.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Binds `port` on all interfaces and spawns the accept loop.
    ///
    /// A second call while already running logs a warning and returns
    /// `Ok(())` without rebinding.
    pub async fn start(&self, port: u16) -> Result<(), StartError> {
        if !validate_port(port) {
            return Err(StartError::InvalidPort(port));
        }

        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!(port, "start() called while already running, ignoring");
            return Ok(());
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let cancel = CancellationToken::new();
        let accept_task = listener::spawn(addr, self.registry.clone(), cancel.clone())?;

        *running = Some(Running { cancel, accept_task });
        Ok(())
    }

    /// Closes the listening socket and waits for the accept loop to exit.
    ///
    /// Outstanding sessions are not forcibly torn down here: their sockets
    /// remain open, their read loops will surface an I/O error on their own
    /// and unregister themselves, per the teardown contract in
    /// [`crate::session`]. A second call while already stopped is a no-op.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(state) = running.take() else {
            return;
        };

        state.cancel.cancel();
        if let Err(err) = state.accept_task.await {
            warn!(error = %err, "accept loop task panicked during stop");
        }
    }
}

impl Default for ServerHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_port_rejects_reserved_and_ephemeral_ranges() {
        assert!(!validate_port(1023));
        assert!(validate_port(1024));
        assert!(validate_port(49151));
        assert!(!validate_port(49152));
        assert!(validate_port(DEFAULT_PORT));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let harness = ServerHarness::new();
        harness.start(0).await.unwrap_err(); // port 0 is out of range by this harness's rule

        let harness = ServerHarness::new();
        harness.start(29_048).await.unwrap();
        harness.start(29_048).await.unwrap(); // second call is a warned no-op, not an error
        harness.stop().await;
        harness.stop().await; // idempotent
    }
}
