//! Builder pattern for constructing a [`NodeModeCoordinator`].

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::capabilities::CapabilityRegistry;
use crate::coordinator::{
    CoordinatorInner, CoordinatorTiming, NodeIdentity, NodeModeCoordinator, NodeStatus,
};
use crate::endpoint::{DiscoveryPreferences, EndpointStore};
use crate::handler::InvokeHandler;
use crate::permissions::{PermissionProvider, StaticPermissions};
use crate::reconnect::ReconnectBackoff;
use crate::session::{GatewayNodeSession, SessionSettings};
use crate::settings::SharedSettings;
use crate::trust_store::{FileTrustStore, TlsTrustStore};
use crate::types::NodeSdkError;

/// Fluent builder for [`NodeModeCoordinator`].
///
/// # Example
///
/// ```rust,no_run
/// # use cl_node_sdk::{CommandRouter, GatewayEndpointConfig, KnownGatewaysStore, NodeModeCoordinatorBuilder};
/// let coordinator = NodeModeCoordinatorBuilder::new()
///     .endpoints(KnownGatewaysStore::single(
///         GatewayEndpointConfig::new("wss://gw.local:18789").with_token("secret"),
///     ))
///     .handler(CommandRouter::new())
///     .client_id("clawlink-linux")
///     .display_name("Workshop PC")
///     .heartbeat_interval(std::time::Duration::from_secs(30))
///     .build()
///     .unwrap();
/// ```
pub struct NodeModeCoordinatorBuilder {
    endpoints: Option<Arc<dyn EndpointStore>>,
    handler: Option<Arc<dyn InvokeHandler>>,
    trust_store: Option<Arc<dyn TlsTrustStore>>,
    permissions: Arc<dyn PermissionProvider>,
    settings: SharedSettings,
    preferences: DiscoveryPreferences,
    registry: CapabilityRegistry,
    identity: NodeIdentity,
    session: SessionSettings,
    backoff: ReconnectBackoff,
    timing: CoordinatorTiming,
}

impl NodeModeCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            endpoints: None,
            handler: None,
            trust_store: None,
            permissions: Arc::new(StaticPermissions::default()),
            settings: SharedSettings::default(),
            preferences: DiscoveryPreferences::default(),
            registry: CapabilityRegistry::default(),
            identity: NodeIdentity::default(),
            session: SessionSettings::default(),
            backoff: ReconnectBackoff::default(),
            timing: CoordinatorTiming::default(),
        }
    }

    // ── Required ─────────────────────────────────────────────────────

    /// Where to connect.
    pub fn endpoints(self, store: impl EndpointStore) -> Self {
        self.shared_endpoints(Arc::new(store))
    }

    pub fn shared_endpoints(mut self, store: Arc<dyn EndpointStore>) -> Self {
        self.endpoints = Some(store);
        self
    }

    /// Who serves invokes.
    pub fn handler(self, handler: impl InvokeHandler) -> Self {
        self.shared_handler(Arc::new(handler))
    }

    pub fn shared_handler(mut self, handler: Arc<dyn InvokeHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    // ── Collaborators ────────────────────────────────────────────────

    /// Pinned fingerprints (default: [`FileTrustStore::default_path`]).
    pub fn trust_store(self, store: impl TlsTrustStore) -> Self {
        self.shared_trust_store(Arc::new(store))
    }

    pub fn shared_trust_store(mut self, store: Arc<dyn TlsTrustStore>) -> Self {
        self.trust_store = Some(store);
        self
    }

    pub fn permissions(mut self, provider: impl PermissionProvider) -> Self {
        self.permissions = Arc::new(provider);
        self
    }

    /// Live settings handle; keep a clone to flip pause/camera/location.
    pub fn settings(mut self, settings: SharedSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Shared discovery preference, usually the one the endpoint store reads.
    pub fn preferences(mut self, preferences: DiscoveryPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    // ── Identity ─────────────────────────────────────────────────────

    pub fn identity(mut self, identity: NodeIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.identity.client_id = id.into();
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.identity.display_name = name.into();
        self
    }

    pub fn scopes(mut self, scopes: impl Into<Vec<String>>) -> Self {
        self.identity.scopes = scopes.into();
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    pub fn session_settings(mut self, settings: SessionSettings) -> Self {
        self.session = settings;
        self
    }

    /// Override the heartbeat interval (default 30s).
    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.session.heartbeat_interval = d;
        self
    }

    /// Override the reconnect backoff policy.
    pub fn reconnect_backoff(mut self, cfg: ReconnectBackoff) -> Self {
        self.backoff = cfg;
        self
    }

    pub fn timing(mut self, timing: CoordinatorTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Build the [`NodeModeCoordinator`].  Does not start it.
    pub fn build(self) -> Result<NodeModeCoordinator, NodeSdkError> {
        let endpoints = self
            .endpoints
            .ok_or_else(|| NodeSdkError::Config("an endpoint store is required".into()))?;
        let handler = self
            .handler
            .ok_or_else(|| NodeSdkError::Config("an invoke handler is required".into()))?;
        if self.identity.client_id.is_empty() {
            return Err(NodeSdkError::Config("client_id must not be empty".into()));
        }
        if self.backoff.initial_delay.is_zero() || self.backoff.backoff_factor == 0 {
            return Err(NodeSdkError::Config(
                "reconnect backoff must have a non-zero initial delay and factor".into(),
            ));
        }
        self.session.validate()?;
        let trust_store = self
            .trust_store
            .unwrap_or_else(|| Arc::new(FileTrustStore::new(FileTrustStore::default_path())));

        let (status, _) = watch::channel(NodeStatus::Stopped);
        let inner = CoordinatorInner {
            session: GatewayNodeSession::new(self.session),
            endpoints,
            handler,
            trust_store,
            permissions: self.permissions,
            settings: self.settings,
            preferences: self.preferences,
            registry: self.registry,
            identity: self.identity,
            retry: Mutex::new(self.backoff.counter()),
            backoff: self.backoff,
            timing: self.timing,
            events: Mutex::new(None),
            status,
            shutdown: Mutex::new(CancellationToken::new()),
            stopped: AtomicBool::new(true),
        };
        Ok(NodeModeCoordinator {
            inner: Arc::new(inner),
            task: Mutex::new(None),
        })
    }
}

impl Default for NodeModeCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
