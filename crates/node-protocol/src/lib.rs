//! Node protocol: WebSocket frames, connect options, invoke/response
//! envelopes, and the capability/command vocabulary shared by nodes and the
//! gateway.
//!
//! Nodes are devices (macOS companion, phones, headless hosts) that attach to
//! the gateway, advertise what they can do, and execute invokes on its
//! behalf.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod caps;
pub mod error;

pub use caps::{commands, Capability, LocationMode};
pub use error::{NodeError, NodeErrorCode};

/// Wire protocol version sent in every `connect` frame.
pub const PROTOCOL_VERSION: u32 = 1;

/// Role string every node sends in its connect options.
pub const NODE_ROLE: &str = "node";

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Node → Gateway: handshake with options and credentials.
    Connect {
        protocol_version: u32,
        options: ConnectOptions,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// Gateway → Node: handshake accepted.
    ConnectOk {
        session_id: String,
        #[serde(default)]
        gateway_version: String,
    },

    /// Gateway → Node: handshake rejected (bad token, unpaired node, ...).
    ConnectRejected {
        reason: String,
    },

    /// Gateway → Node: run a command.
    Invoke(InvokeRequest),

    /// Node → Gateway: result of an earlier invoke.
    InvokeResult(InvokeResponse),

    /// Node → Gateway: one-way event, no reply expected.
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload_json: Option<String>,
    },

    /// Bidirectional: heartbeat.
    Ping { timestamp: i64 },

    /// Bidirectional: heartbeat response.
    Pong { timestamp: i64 },

    /// Any frame type this node does not know about.
    #[serde(other)]
    Unknown,
}

/// Options a node presents on every connection attempt.
///
/// Built fresh per attempt so the gateway always sees the node's current
/// capabilities and permission grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub caps: Vec<String>,
    pub commands: Vec<String>,
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,
    pub client_id: String,
    pub client_mode: String,
    pub client_display_name: String,
}

/// A gateway-initiated command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Correlation ID, echoed back in the response.
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Exactly one of these is sent for every invoke the node accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
}

impl InvokeResponse {
    pub fn success(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: NodeError) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}
