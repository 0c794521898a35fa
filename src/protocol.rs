//! # Wire protocol between the control plane and rendering nodes.
//!
//! Frames are JSON objects tagged by `type` (snake_case), one per line on the
//! TCP transport.
//!
//! ```text
//! node ──► plane   {"type":"register","name":"wall-a"}
//! plane ──► node   {"type":"registration_ack","node_id":3,"name":"wall-a","heartbeat_interval_secs":30}
//! node ──► plane   {"type":"heartbeat"}
//! plane ──► node   {"type":"heartbeat_ack","next_heartbeat_secs":30}
//! plane ──► node   {"type":"execute_command","command":"render --scene lobby","preset_id":7}
//! node ──► plane   {"type":"execution_result","status":"completed"}
//! node ──► plane   {"type":"ping"}
//! plane ──► node   {"type":"pong","at":"2024-05-01T09:00:00Z"}
//! plane ──► node   {"type":"server_shutdown","reconnect_after_secs":5,"at":"..."}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, TransportError};
use crate::model::{ExecutionId, ExecutionStatus, NodeId, NodeStatus, PresetId};

/// Terminal outcome reported by a node for an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    #[serde(alias = "success", alias = "succeeded")]
    Completed,
    #[serde(alias = "failed", alias = "error")]
    Crashed,
}

impl From<ExecutionOutcome> for ExecutionStatus {
    fn from(o: ExecutionOutcome) -> Self {
        match o {
            ExecutionOutcome::Completed => ExecutionStatus::Completed,
            ExecutionOutcome::Crashed => ExecutionStatus::Crashed,
        }
    }
}

/// Node → plane frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// First contact. `address` overrides the peer address when present.
    Register {
        name: String,
        #[serde(default)]
        address: Option<String>,
    },
    Heartbeat {
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    ProcessStatus {
        #[serde(alias = "running_process_count")]
        running: u32,
        #[serde(default)]
        crashed: u32,
    },
    ExecutionResult {
        #[serde(default)]
        execution_id: Option<ExecutionId>,
        status: ExecutionOutcome,
    },
    StopResult {
        #[serde(default)]
        status: Option<String>,
    },
    ConnectionCheckResponse {},
    /// Keepalive; answered with `pong`, registered or not.
    Ping {},
    /// Asks for the plane's view of this node. `name` identifies an unregistered session.
    #[serde(rename = "client_status_request")]
    StatusRequest {
        #[serde(default)]
        name: Option<String>,
    },
}

impl Inbound {
    /// Decodes one frame.
    pub fn decode(frame: &str) -> Result<Self, Error> {
        serde_json::from_str(frame).map_err(|e| Error::protocol(e.to_string()))
    }

    /// Short label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Inbound::Register { .. } => "register",
            Inbound::Heartbeat { .. } => "heartbeat",
            Inbound::ProcessStatus { .. } => "process_status",
            Inbound::ExecutionResult { .. } => "execution_result",
            Inbound::StopResult { .. } => "stop_result",
            Inbound::ConnectionCheckResponse {} => "connection_check_response",
            Inbound::Ping {} => "ping",
            Inbound::StatusRequest { .. } => "client_status_request",
        }
    }
}

/// Plane health reported in `server_status_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Online,
    /// The plane could not read its records.
    Error,
}

/// Plane → node frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    ExecuteCommand {
        command: String,
        preset_id: PresetId,
    },
    StopCommand {
        preset_id: PresetId,
    },
    ConnectionCheck {
        at: DateTime<Utc>,
    },
    RegistrationAck {
        node_id: NodeId,
        name: String,
        heartbeat_interval_secs: u64,
    },
    RegistrationFailed {
        reason: String,
    },
    HeartbeatAck {
        next_heartbeat_secs: u64,
    },
    /// Heartbeat from an address with no known node.
    RegisterRequired {
        reason: String,
    },
    Pong {
        at: DateTime<Utc>,
    },
    #[serde(rename = "server_status_response")]
    ServerStatusResponse {
        server_status: ServerState,
        /// Stored status of the asking node; absent if it is unknown.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_status: Option<NodeStatus>,
        uptime_secs: u64,
        at: DateTime<Utc>,
    },
    /// The plane is going away; reconnect after the given delay.
    ServerShutdown {
        reconnect_after_secs: u64,
        at: DateTime<Utc>,
    },
}

impl Outbound {
    /// Encodes one frame (no trailing newline).
    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Codec(e.to_string()))
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Outbound::ExecuteCommand { .. } => "execute_command",
            Outbound::StopCommand { .. } => "stop_command",
            Outbound::ConnectionCheck { .. } => "connection_check",
            Outbound::RegistrationAck { .. } => "registration_ack",
            Outbound::RegistrationFailed { .. } => "registration_failed",
            Outbound::HeartbeatAck { .. } => "heartbeat_ack",
            Outbound::RegisterRequired { .. } => "register_required",
            Outbound::Pong { .. } => "pong",
            Outbound::ServerStatusResponse { .. } => "server_status_response",
            Outbound::ServerShutdown { .. } => "server_shutdown",
        }
    }
}

/// Heartbeat delivered over the HTTP fallback path.
///
/// Same liveness effect as a transport heartbeat; never creates or closes a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeartbeat {
    pub name: String,
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_inbound_variants() {
        let f = Inbound::decode(r#"{"type":"register","name":"wall-a"}"#).unwrap();
        assert_eq!(
            f,
            Inbound::Register {
                name: "wall-a".into(),
                address: None
            }
        );

        let f = Inbound::decode(r#"{"type":"process_status","running_process_count":2}"#).unwrap();
        assert_eq!(f, Inbound::ProcessStatus { running: 2, crashed: 0 });

        let f = Inbound::decode(r#"{"type":"execution_result","status":"success"}"#).unwrap();
        assert_eq!(
            f,
            Inbound::ExecutionResult {
                execution_id: None,
                status: ExecutionOutcome::Completed
            }
        );

        let f = Inbound::decode(r#"{"type":"connection_check_response"}"#).unwrap();
        assert_eq!(f.as_label(), "connection_check_response");
    }

    #[test]
    fn test_decode_keepalive_and_status_request() {
        assert_eq!(Inbound::decode(r#"{"type":"ping"}"#).unwrap(), Inbound::Ping {});
        let f = Inbound::decode(r#"{"type":"client_status_request","name":"wall-a"}"#).unwrap();
        assert_eq!(
            f,
            Inbound::StatusRequest {
                name: Some("wall-a".into())
            }
        );
        assert_eq!(f.as_label(), "client_status_request");
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = Inbound::decode(r#"{"type":"reboot"}"#).unwrap_err();
        assert_eq!(err.as_label(), "protocol_violation");
    }

    #[test]
    fn test_encode_execute_command() {
        let line = Outbound::ExecuteCommand {
            command: "render".into(),
            preset_id: PresetId(7),
        }
        .encode()
        .unwrap();
        assert_eq!(
            line,
            r#"{"type":"execute_command","command":"render","preset_id":7}"#
        );
    }
}
