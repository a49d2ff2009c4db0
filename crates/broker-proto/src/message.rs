//! Message schema for the greenhouse telemetry broker wire protocol.
//!
//! Two representations live here, for different purposes:
//!
//! - [`Envelope`] is what the broker actually decodes off the wire. It is
//!   deliberately lenient — every field beyond `type` is optional — because
//!   the broker reads only `type`, `role`, `nodeId` (handshake frames) and
//!   `targetNode` (actuator commands) and forwards everything else as
//!   opaque bytes without ever reconstructing the frame from typed fields.
//! - [`Message`] is the full wire schema, used to *construct* frames the
//!   broker originates itself (`REGISTER_ACK`, `HEARTBEAT`, `ERROR`) and to
//!   document the shapes sensor nodes and control panels exchange.

use serde::{Deserialize, Serialize};

/// Protocol version advertised by this broker.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Sentinel `targetNode` value meaning "every registered sensor node".
pub const BROADCAST_ALL: &str = "ALL";

/// Declared peer role, fixed at handshake for the life of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// A publisher of sensor readings and actuator state.
    SensorNode,
    /// A subscriber to the broadcast stream, and issuer of actuator commands.
    ControlPanel,
}

/// Direction carried on a `HEARTBEAT` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeartbeatDirection {
    /// Sent by the broker when a connection's idle deadline expires.
    ServerToClient,
    /// Sent by a cooperating client to pre-empt the server's idle deadline.
    ClientToServer,
}

/// The envelope fields the broker is allowed to read off any frame.
///
/// Every field besides `type` is optional: a frame whose type the broker
/// does not recognise, or whose recognised fields are absent, is still
/// forwarded opaquely rather than rejected. Only frames that are not valid
/// JSON at all fail to decode into an `Envelope`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// The wire message type, e.g. `"SENSOR_DATA"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Declared role, present on handshake frames.
    pub role: Option<String>,
    /// Declared node identifier, present on handshake frames.
    #[serde(rename = "nodeId")]
    pub node_id: Option<String>,
    /// Routing target, present on `ACTUATOR_COMMAND` frames.
    #[serde(rename = "targetNode")]
    pub target_node: Option<String>,
}

/// Well-known wire message types.
///
/// These names are the exact `type` tag values exchanged on the wire; they
/// are matched against [`Envelope::kind`] rather than deserialised directly
/// from client frames, since the broker must tolerate fields it does not
/// model here (see module docs).
pub mod kind {
    /// Handshake: sensor node announcing itself.
    pub const REGISTER_NODE: &str = "REGISTER_NODE";
    /// Handshake: control panel announcing itself.
    pub const REGISTER_CONTROL_PANEL: &str = "REGISTER_CONTROL_PANEL";
    /// Handshake reply, server to client.
    pub const REGISTER_ACK: &str = "REGISTER_ACK";
    /// Sensor reading, forwarded to all panels.
    pub const SENSOR_DATA: &str = "SENSOR_DATA";
    /// Panel-issued actuator command, routed to one or all sensor nodes.
    pub const ACTUATOR_COMMAND: &str = "ACTUATOR_COMMAND";
    /// Sensor-reported actuator state, forwarded to all panels.
    pub const ACTUATOR_STATE: &str = "ACTUATOR_STATE";
    /// Sensor-reported actuator status, forwarded to all panels.
    pub const ACTUATOR_STATUS: &str = "ACTUATOR_STATUS";
    /// Optional acknowledgement of a command; never emitted by this broker.
    pub const COMMAND_ACK: &str = "COMMAND_ACK";
    /// Liveness frame, either direction.
    pub const HEARTBEAT: &str = "HEARTBEAT";
    /// Error report.
    pub const ERROR: &str = "ERROR";
    /// Optional server-originated notice; never emitted by this broker.
    pub const NODE_CONNECTED: &str = "NODE_CONNECTED";
    /// Optional server-originated notice; never emitted by this broker.
    pub const NODE_DISCONNECTED: &str = "NODE_DISCONNECTED";
    /// Optional server-originated listing; never emitted by this broker.
    pub const NODE_LIST: &str = "NODE_LIST";
}

/// Full wire schema, used to construct frames the broker originates.
///
/// Only [`Message::RegisterAck`], [`Message::Heartbeat`] and
/// [`Message::Error`] are ever serialised by this broker; the remaining
/// variants exist to document the shapes sensor nodes and control panels
/// exchange with each other, and so that a test harness can construct them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Sensor node handshake.
    #[serde(rename_all = "camelCase")]
    RegisterNode {
        role: Role,
        node_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        protocol_version: Option<String>,
    },
    /// Control panel handshake.
    #[serde(rename_all = "camelCase")]
    RegisterControlPanel {
        role: Role,
        node_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        protocol_version: Option<String>,
    },
    /// Handshake acknowledgement, server to client.
    #[serde(rename_all = "camelCase")]
    RegisterAck {
        protocol_version: String,
        role: Role,
        node_id: String,
        message: String,
    },
    /// Liveness frame.
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        direction: HeartbeatDirection,
        #[serde(skip_serializing_if = "Option::is_none")]
        protocol_version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
    },
    /// Sensor reading.
    #[serde(rename_all = "camelCase")]
    SensorData {
        node_id: String,
        sensor_key: String,
        /// Value is string-encoded on the wire regardless of logical type.
        value: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Actuator command issued by a control panel.
    #[serde(rename_all = "camelCase")]
    ActuatorCommand {
        #[serde(skip_serializing_if = "Option::is_none")]
        actuator: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        /// Numeric commands may arrive as a string-encoded value instead of `action`.
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        /// Node id, or [`BROADCAST_ALL`].
        #[serde(skip_serializing_if = "Option::is_none")]
        target_node: Option<String>,
    },
    /// Sensor-reported actuator state.
    ///
    /// The source uses `actuator`/`actuatorKey` and `state`/`status`
    /// inconsistently; both are modelled so a test harness can construct
    /// either shape. The broker never reads these fields — see module docs.
    #[serde(rename_all = "camelCase")]
    ActuatorState {
        node_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actuator: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        actuator_key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Sensor-reported actuator status; wire-identical to [`Message::ActuatorState`].
    #[serde(rename_all = "camelCase")]
    ActuatorStatus {
        node_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        actuator: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        actuator_key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Optional acknowledgement of an actuator command; never emitted by this broker.
    #[serde(rename_all = "camelCase")]
    CommandAck {
        #[serde(skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Optional connect notice; never emitted by this broker.
    #[serde(rename_all = "camelCase")]
    NodeConnected {
        node_id: String,
    },
    /// Optional disconnect notice; never emitted by this broker.
    #[serde(rename_all = "camelCase")]
    NodeDisconnected {
        node_id: String,
    },
    /// Optional registered-node listing; never emitted by this broker.
    NodeList {
        /// Comma-separated node ids.
        nodes: String,
    },
    /// Error report.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_ack_serialises_expected_shape() {
        let msg = Message::RegisterAck {
            protocol_version: PROTOCOL_VERSION.to_string(),
            role: Role::SensorNode,
            node_id: "dev-1".to_string(),
            message: "Registration successful".to_string(),
        };
        let v: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "REGISTER_ACK");
        assert_eq!(v["protocolVersion"], "1.0");
        assert_eq!(v["role"], "SENSOR_NODE");
        assert_eq!(v["nodeId"], "dev-1");
        assert_eq!(v["message"], "Registration successful");
    }

    #[test]
    fn envelope_decodes_unknown_type_without_error() {
        let raw = br#"{"type":"SOMETHING_NEW","extra":123}"#;
        let env: Envelope = serde_json::from_slice(raw).unwrap();
        assert_eq!(env.kind, "SOMETHING_NEW");
        assert!(env.role.is_none());
    }

    #[test]
    fn envelope_ignores_unread_fields() {
        let raw =
            br#"{"type":"SENSOR_DATA","nodeId":"dev-1","sensorKey":"temp","value":"22.5","unit":"C"}"#;
        let env: Envelope = serde_json::from_slice(raw).unwrap();
        assert_eq!(env.kind, "SENSOR_DATA");
        assert_eq!(env.node_id.as_deref(), Some("dev-1"));
        assert!(env.target_node.is_none());
    }

    #[test]
    fn actuator_command_targets_broadcast_sentinel() {
        let raw = br#"{"type":"ACTUATOR_COMMAND","targetNode":"ALL","actuator":"fan","action":"ON"}"#;
        let env: Envelope = serde_json::from_slice(raw).unwrap();
        assert_eq!(env.kind, kind::ACTUATOR_COMMAND);
        assert_eq!(env.target_node.as_deref(), Some(BROADCAST_ALL));
    }
}
