//! Wire types and frame codec for the greenhouse telemetry broker protocol.
//!
//! Messages are framed as a 4-byte big-endian length prefix followed by a
//! UTF-8 JSON payload. The broker only ever decodes the envelope fields it
//! needs to route a frame (`type`, `role`, `nodeId`, `targetNode`); it never
//! reconstructs and re-serialises a forwarded frame.

#![warn(missing_docs)]

pub mod codec;
pub mod message;

pub use codec::{is_disconnect, read_frame, write_frame, FrameError, MAX_FRAME_LEN};
pub use message::{kind, Envelope, HeartbeatDirection, Message, Role, BROADCAST_ALL, PROTOCOL_VERSION};
