//! Accept loop: binds the listening socket and spawns a session per
//! connection.

use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::registry::ConnectionRegistry;
use crate::session;

/// Backlog passed to `listen(2)`. The spec requires at least 50.
const BACKLOG: i32 = 1024;

/// Binds `addr` with address-reuse enabled and the configured backlog.
///
/// Built on `socket2` rather than `TcpListener::bind` directly so
/// `SO_REUSEADDR` can be set before `bind`, matching the accept-loop
/// convention this server's listener follows.
fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Spawns the accept loop as a background task.
///
/// Consumes incoming connections until `cancel` is triggered, at which
/// point the listener is dropped (closing the listening socket) and the
/// loop exits. Each accepted connection is handed to a fresh
/// [`session::run`] task; accept failures while running are logged and the
/// loop continues.
pub fn spawn(
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    let listener = bind(addr)?;
    info!(%addr, "broker listening");

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("listener stopping");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let registry = registry.clone();
                            tokio::spawn(async move {
                                session::run(stream, peer_addr, registry).await;
                            });
                        }
                        Err(err) => {
                            error!(error = %err, "accept failed");
                        }
                    }
                }
            }
        }
    }))
}
