//! Per-connection state machine: handshake, active dispatch, idle/heartbeat
//! discipline, and teardown.
//!
//! ```text
//! NEW ──accept──▶ AWAIT_HANDSHAKE ──valid REGISTER_*──▶ ACTIVE ──teardown──▶ CLOSED
//!                      │                                   │
//!                      └─invalid first frame / EOF─────────┴──idle exhaustion / I/O error─▶ CLOSED
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use greenhouse_broker_proto::{
    is_disconnect, kind, read_frame, Envelope, FrameError, HeartbeatDirection, Message, Role,
    BROADCAST_ALL, PROTOCOL_VERSION,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::registry::{ConnectionRegistry, PeerWriter};

/// Read deadline per connection; exceeding it without a frame triggers a
/// heartbeat, and exceeding it repeatedly tears the connection down.
const IDLE_WINDOW: Duration = Duration::from_secs(30);

/// Consecutive idle windows tolerated before the connection is closed.
/// A cooperating peer has roughly `IDLE_WINDOW * (MAX_IDLE_TICKS + 1)` of
/// hard inactivity ceiling, i.e. ~90 seconds.
const MAX_IDLE_TICKS: u32 = 2;

/// A fatal handshake-phase error: the connection is closed without an ACK.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The first frame failed to decode, had the wrong type, or was
    /// missing a required field.
    #[error("handshake violation: {reason}")]
    HandshakeViolation {
        /// Human-readable explanation, logged but never sent to the peer.
        reason: String,
    },
    /// No frame arrived, or an I/O error occurred, before handshake completed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<greenhouse_broker_proto::FrameError> for SessionError {
    fn from(err: greenhouse_broker_proto::FrameError) -> Self {
        SessionError::Io(err.into())
    }
}

/// Configures a freshly accepted socket per the idle/liveness contract:
/// Nagle disabled, TCP keepalive enabled.
fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let sock_ref = socket2::SockRef::from(stream);
    sock_ref.set_keepalive(true)?;
    Ok(())
}

/// Runs a single accepted connection to completion: handshake, active
/// dispatch loop, then teardown. Never panics on a misbehaving peer; every
/// failure path falls through to unregistration and socket close.
pub async fn run(stream: TcpStream, peer_addr: SocketAddr, registry: Arc<ConnectionRegistry>) {
    if let Err(err) = configure_socket(&stream) {
        warn!(%peer_addr, error = %err, "failed to configure accepted socket");
        return;
    }

    let (read_half, write_half) = stream.into_split();
    let writer = PeerWriter::new(write_half);
    let mut session = ClientSession {
        registry,
        read_half,
        writer,
        peer_addr,
        role: None,
        node_id: None,
        idle_ticks: 0,
    };

    match session.handshake().await {
        Ok(()) => session.active_loop().await,
        Err(err) => debug!(%peer_addr, error = %err, "handshake failed, closing"),
    }

    session.teardown();
}

struct ClientSession {
    registry: Arc<ConnectionRegistry>,
    read_half: tokio::net::tcp::OwnedReadHalf,
    writer: PeerWriter,
    peer_addr: SocketAddr,
    role: Option<Role>,
    node_id: Option<String>,
    idle_ticks: u32,
}

impl ClientSession {
    /// Awaits the first frame and validates it is a well-formed `REGISTER_*`.
    /// On success, records role/nodeId, sends `REGISTER_ACK`, and registers
    /// the connection in the appropriate registry directory.
    async fn handshake(&mut self) -> Result<(), SessionError> {
        let frame = timeout(IDLE_WINDOW, read_frame(&mut self.read_half))
            .await
            .map_err(|_| SessionError::HandshakeViolation {
                reason: "no frame within idle window".to_string(),
            })??;

        let envelope: Envelope = serde_json::from_slice(&frame).map_err(|err| {
            SessionError::HandshakeViolation {
                reason: format!("first frame is not valid JSON: {err}"),
            }
        })?;

        let (role, expected_role_field) = match envelope.kind.as_str() {
            kind::REGISTER_NODE => (Role::SensorNode, "SENSOR_NODE"),
            kind::REGISTER_CONTROL_PANEL => (Role::ControlPanel, "CONTROL_PANEL"),
            other => {
                return Err(SessionError::HandshakeViolation {
                    reason: format!("expected a REGISTER_* frame, got {other}"),
                })
            }
        };

        match envelope.role.as_deref() {
            Some(role_field) if role_field == expected_role_field => {}
            Some(other) => {
                return Err(SessionError::HandshakeViolation {
                    reason: format!("role {other} does not match message type"),
                })
            }
            None => {
                return Err(SessionError::HandshakeViolation {
                    reason: "missing role".to_string(),
                })
            }
        }

        let node_id = match envelope.node_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                return Err(SessionError::HandshakeViolation {
                    reason: "missing or empty nodeId".to_string(),
                })
            }
        };

        let ack = Message::RegisterAck {
            protocol_version: PROTOCOL_VERSION.to_string(),
            role,
            node_id: node_id.clone(),
            message: "Registration successful".to_string(),
        };
        let ack_bytes = serde_json::to_vec(&ack).expect("RegisterAck always serialises");
        self.writer.send(&ack_bytes).await?;

        match role {
            Role::SensorNode => self
                .registry
                .register_sensor(node_id.clone(), self.writer.clone()),
            Role::ControlPanel => self
                .registry
                .register_panel(self.writer.clone(), node_id.clone()),
        }

        self.role = Some(role);
        self.node_id = Some(node_id);
        debug!(peer = %self.peer_addr, role = ?role, node_id = %self.node_id.as_deref().unwrap_or(""), "handshake complete");
        Ok(())
    }

    /// Reads and dispatches frames until EOF, an I/O error, a framing
    /// violation, idle exhaustion, or an explicit protocol violation.
    async fn active_loop(&mut self) {
        loop {
            match timeout(IDLE_WINDOW, read_frame(&mut self.read_half)).await {
                Ok(Ok(frame)) => {
                    self.idle_ticks = 0;
                    if self.dispatch(&frame).await {
                        return;
                    }
                }
                Ok(Err(FrameError::Io(err))) if is_disconnect(&err) => {
                    debug!(peer = %self.peer_addr, "peer disconnected");
                    return;
                }
                Ok(Err(err)) => {
                    warn!(peer = %self.peer_addr, error = %err, "framing violation, closing");
                    return;
                }
                Err(_elapsed) => {
                    self.idle_ticks += 1;
                    if self.idle_ticks > MAX_IDLE_TICKS {
                        debug!(peer = %self.peer_addr, "idle tolerance exceeded, closing");
                        return;
                    }
                    if self.send_heartbeat().await.is_err() {
                        debug!(peer = %self.peer_addr, "heartbeat send failed, closing");
                        return;
                    }
                }
            }
        }
    }

    async fn send_heartbeat(&self) -> std::io::Result<()> {
        let hb = Message::Heartbeat {
            direction: HeartbeatDirection::ServerToClient,
            protocol_version: Some(PROTOCOL_VERSION.to_string()),
            node_id: None,
        };
        let bytes = serde_json::to_vec(&hb).expect("Heartbeat always serialises");
        self.writer.send(&bytes).await
    }

    /// Applies the active-dispatch table to a single frame. Returns `true`
    /// if the connection must be closed (a post-handshake `REGISTER_*`).
    async fn dispatch(&self, frame: &[u8]) -> bool {
        let envelope: Envelope = match serde_json::from_slice(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(peer = %self.peer_addr, error = %err, "unparseable frame, dropping");
                return false;
            }
        };

        match envelope.kind.as_str() {
            kind::HEARTBEAT => {}
            kind::SENSOR_DATA | kind::ACTUATOR_STATE | kind::ACTUATOR_STATUS => {
                if self.role == Some(Role::SensorNode) {
                    self.registry.broadcast_to_panels(frame).await;
                } else {
                    warn!(peer = %self.peer_addr, kind = %envelope.kind, "dropping frame from non-sensor role");
                }
            }
            kind::ACTUATOR_COMMAND => {
                if self.role == Some(Role::ControlPanel) {
                    self.dispatch_actuator_command(frame, envelope.target_node.as_deref())
                        .await;
                } else {
                    warn!(peer = %self.peer_addr, "dropping actuator command from non-panel role");
                }
            }
            kind::REGISTER_NODE | kind::REGISTER_CONTROL_PANEL => {
                warn!(peer = %self.peer_addr, "post-handshake REGISTER_*, closing");
                return true;
            }
            other => {
                debug!(peer = %self.peer_addr, kind = other, "ignoring unknown or unhandled type");
            }
        }

        false
    }

    async fn dispatch_actuator_command(&self, frame: &[u8], target_node: Option<&str>) {
        match target_node {
            Some(BROADCAST_ALL) => self.registry.broadcast_to_sensors(frame).await,
            Some(node_id) => {
                self.registry.send_to_sensor(node_id, frame).await;
            }
            None => {
                warn!(peer = %self.peer_addr, "actuator command missing targetNode, dropping");
            }
        }
    }

    /// Unregisters this session (a no-op if it never completed handshake).
    /// Safe to call exactly once per session, at the end of its lifetime.
    fn teardown(&self) {
        match self.role {
            Some(Role::SensorNode) => {
                if let Some(node_id) = &self.node_id {
                    self.registry.unregister_sensor(node_id);
                }
            }
            Some(Role::ControlPanel) => self.registry.unregister_panel(&self.writer),
            None => {}
        }
        debug!(peer = %self.peer_addr, "session closed");
    }
}
