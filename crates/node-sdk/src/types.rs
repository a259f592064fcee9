//! Core types: session state, disconnect reasons, and SDK errors.

use std::fmt;

/// Lifecycle of a single [`GatewayNodeSession`](crate::session::GatewayNodeSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Why a connected session ended.  Reported exactly once per successful
/// connect through `on_disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally.
    Requested,
    /// The socket closed, errored, or went silent past the heartbeat window.
    TransportClosed,
    /// The gateway sent a frame we could not decode.
    ProtocolError,
    /// The gateway closed the link with a policy violation (credentials revoked).
    AuthFailed,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::TransportClosed => "transportClosed",
            Self::ProtocolError => "protocolError",
            Self::AuthFailed => "authFailed",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Certificate fingerprint did not match the pinned value.
    Trust,
    /// Gateway rejected the credentials.
    Auth,
    /// DNS, refused connection, timeout, dropped socket.
    Transport,
    /// Malformed or unexpected frames.
    Protocol,
    /// Local configuration problem (not paired, bad URL).
    Config,
}

/// Top-level SDK error.
#[derive(thiserror::Error, Debug)]
pub enum NodeSdkError {
    #[error("config: {0}")]
    Config(String),
    #[error("gateway not configured: {0}")]
    NotConfigured(String),
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error(
        "TLS fingerprint mismatch for {store_key}: expected {expected}, gateway presented {presented}"
    )]
    TrustMismatch {
        store_key: String,
        expected: String,
        presented: String,
    },
    #[error("trust store: {0}")]
    TrustStore(String),
    #[error("gateway rejected connection: {0}")]
    AuthRejected(String),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("not connected")]
    NotConnected,
    #[error("session already active")]
    AlreadyConnected,
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl NodeSdkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TrustMismatch { .. } | Self::TrustStore(_) => ErrorKind::Trust,
            Self::AuthRejected(_) => ErrorKind::Auth,
            Self::Handshake(_) => ErrorKind::Protocol,
            Self::Config(_) | Self::NotConfigured(_) | Self::AlreadyConnected => ErrorKind::Config,
            Self::WebSocket(_) | Self::Timeout(_) | Self::NotConnected | Self::Other(_) => {
                ErrorKind::Transport
            }
        }
    }

    /// Whether this failure needs an operator before the same endpoint is
    /// tried again.
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, Self::TrustMismatch { .. })
    }
}

impl From<std::io::Error> for NodeSdkError {
    fn from(e: std::io::Error) -> Self {
        Self::Other(e.into())
    }
}

impl From<serde_json::Error> for NodeSdkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Handshake(e.to_string())
    }
}
