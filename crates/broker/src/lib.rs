//! Pub/sub message broker core for simulated greenhouse telemetry.
//!
//! # Mental model
//!
//! One listening endpoint, two peer roles. Sensor nodes publish readings
//! and actuator state; control panels subscribe to that stream and issue
//! actuator commands. The broker authenticates role/identity at handshake,
//! routes by declared role and target-node addressing, and enforces
//! liveness through idle timers and heartbeats. It never inspects payload
//! contents beyond the envelope fields needed to route a frame.
//!
//! # Key types
//!
//! | Type | Role |
//! | --- | --- |
//! | [`ServerHarness`] | Owns the listening socket lifecycle: bind, accept loop, shutdown. |
//! | [`ConnectionRegistry`] | Thread-safe directories of panels and sensor nodes; broadcast and targeted delivery with dead-peer pruning. |
//! | [`registry::PeerWriter`] | A connection's serialised write handle, and the registry's key for panels. |
//!
//! # Invariants
//!
//! - Registration exclusivity: no frame is broadcast from a peer until that
//!   peer's `REGISTER_ACK` has been sent.
//!   - Enforced in: `session::ClientSession::handshake`
//!   - Tested by: `session::tests::malformed_handshake_never_registers`
//!   - Failure symptom: a peer that never completed handshake would still
//!     appear able to receive or originate routed traffic.
//! - No registry-wide lock is held across a write: every broadcast and
//!   targeted send snapshots its target set under a short lock, releases
//!   it, writes outside any lock, then reacquires briefly only to prune a
//!   failed entry.
//!   - Enforced in: `registry::ConnectionRegistry::broadcast_to_panels` /
//!     `broadcast_to_sensors` / `send_to_sensor`
//!   - Tested by: `registry::tests::broadcast_prunes_dead_panel_but_delivers_to_others`
//!   - Failure symptom: a slow or dead peer would stall delivery to every
//!     other peer, or the registry would deadlock under concurrent access.
//!
//! # Lifecycle
//!
//! - Startup: [`ServerHarness::start`] binds the configured port and spawns
//!   the accept loop.
//! - Per-connection: [`listener::spawn`] hands each accepted socket to
//!   [`session::run`], which owns that connection until teardown.
//! - Shutdown: [`ServerHarness::stop`] cancels the accept loop's listening
//!   socket and awaits its exit; outstanding sessions tear themselves down
//!   independently when their sockets surface an I/O error.

#![warn(missing_docs)]

pub mod harness;
pub mod listener;
pub mod registry;
pub mod session;

pub use harness::{validate_port, ServerHarness, StartError, DEFAULT_PORT, MAX_PORT, MIN_PORT};
pub use registry::ConnectionRegistry;
