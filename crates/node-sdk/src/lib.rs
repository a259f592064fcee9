//! `cl-node-sdk`: building blocks for ClawLink nodes.
//!
//! A "node" is a device process that connects to the gateway over a
//! WebSocket, advertises its capabilities and commands, and executes invokes
//! on the gateway's behalf.  This crate owns the connection lifecycle so
//! node authors only implement the commands themselves.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Your Node (desktop companion / headless host / CLI)      │
//! │                                                           │
//! │   let mut router = CommandRouter::new();                  │
//! │   router.register("system.which", Which);                 │
//! │                                                           │
//! │   NodeModeCoordinatorBuilder::new()                       │
//! │       .endpoints(KnownGatewaysStore::single(endpoint))    │
//! │       .handler(router)                                    │
//! │       .settings(shared_settings.clone())                  │
//! │       .build()?                                           │
//! │       .run_until(shutdown)                                │
//! │       .await;                                             │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection flow
//!
//! 1. Resolve the endpoint (fails fast when the node is not paired)
//! 2. Snapshot caps, commands, and permissions; derive the TLS policy
//! 3. Open `ws://` or pinned `wss://` (trust on first use, then exact match)
//! 4. Send `connect { options, token?, password? }`, wait for `connect_ok`
//! 5. Pin the fingerprint, call `on_connected`, then serve:
//!    - `invoke` → delegate → exactly one `invoke_result`
//!    - `ping` → `pong`; periodic `ping` keeps the link alive
//! 6. On close: `on_disconnected(reason)` once, then reconnect promptly;
//!    failed attempts back off 1s, 2s, 4s, 8s, 10s, ...

pub mod builder;
pub mod capabilities;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod handler;
pub mod permissions;
pub mod reconnect;
pub mod session;
pub mod settings;
pub mod tls;
pub mod trust_store;
pub mod types;

mod transport;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::NodeModeCoordinatorBuilder;
pub use capabilities::CapabilityRegistry;
pub use config::NodeConfig;
pub use coordinator::{CoordinatorTiming, NodeIdentity, NodeModeCoordinator, NodeStatus};
pub use endpoint::{
    DiscoveryPreferences, EndpointStore, GatewayEndpointConfig, KnownGateway, KnownGatewaysStore,
};
pub use handler::{CommandHandler, CommandResult, CommandRouter, InvokeContext, InvokeHandler};
pub use permissions::{PermissionKind, PermissionProvider, StaticPermissions};
pub use reconnect::{ReconnectBackoff, RetryDelay};
pub use session::{
    ConnectRequest, ConnectedInfo, EventSender, GatewayNodeSession, SessionDelegate,
    SessionSettings,
};
pub use settings::{NodeSettings, SharedSettings};
pub use tls::{fingerprint_der, TlsPinning, TlsPinningParams, TransportPolicy};
pub use trust_store::{FileTrustStore, MemoryTrustStore, TlsTrustStore};
pub use types::{DisconnectReason, ErrorKind, NodeSdkError, SessionState};

// Re-export protocol types so nodes never need to import cl-protocol directly.
pub use cl_protocol::{
    commands, Capability, ConnectOptions, InvokeRequest, InvokeResponse, LocationMode, NodeError,
    NodeErrorCode, WsMessage,
};
