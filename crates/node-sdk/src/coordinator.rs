//! Node mode coordinator: keeps one gateway session alive for the lifetime
//! of the node.
//!
//! The loop only ends on [`NodeModeCoordinator::stop`].  Each iteration it
//! takes a fresh settings snapshot, reacts to pause and camera changes, and
//! either waits on the live session or makes a new connection attempt.
//! Failed attempts back off (1s doubling to 10s); a dropped session is
//! retried promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cl_protocol::{ConnectOptions, InvokeRequest, InvokeResponse, NodeError, NODE_ROLE};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capabilities::CapabilityRegistry;
use crate::endpoint::{DiscoveryPreferences, EndpointStore};
use crate::handler::InvokeHandler;
use crate::permissions::{current_permissions, PermissionProvider};
use crate::reconnect::{ReconnectBackoff, RetryDelay};
use crate::session::{
    ConnectRequest, ConnectedInfo, EventSender, GatewayNodeSession, SessionDelegate,
};
use crate::settings::SharedSettings;
use crate::tls::TransportPolicy;
use crate::trust_store::TlsTrustStore;
use crate::types::{DisconnectReason, NodeSdkError, SessionState};

/// What the coordinator is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Stopped,
    Paused,
    Connecting,
    Connected { session_id: String },
    Backoff { delay: Duration },
    /// The gateway presented a certificate that does not match the pin.
    /// Cleared only when the pin or the endpoint changes.
    TrustFailure { store_key: String },
    NotConfigured,
}

/// How this node identifies itself in the connect options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub client_id: String,
    pub client_mode: String,
    pub display_name: String,
    pub scopes: Vec<String>,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            client_id: "clawlink-node".into(),
            client_mode: "node".into(),
            display_name: "ClawLink Node".into(),
            scopes: Vec::new(),
        }
    }
}

/// Poll and settle intervals of the run loop.
#[derive(Debug, Clone)]
pub struct CoordinatorTiming {
    /// Re-check interval while paused.
    pub pause_poll: Duration,
    /// Pause after a camera-driven disconnect before reconnecting.
    pub settle_delay: Duration,
    /// Re-check interval while a session is live.
    pub connected_poll: Duration,
}

impl Default for CoordinatorTiming {
    fn default() -> Self {
        Self {
            pause_poll: Duration::from_secs(1),
            settle_delay: Duration::from_millis(200),
            connected_poll: Duration::from_secs(1),
        }
    }
}

/// Remembers a trust failure so the same endpoint is not hammered.
#[derive(Debug, Clone)]
struct TrustBlock {
    url: String,
    store_key: String,
    pinned: Option<String>,
}

enum Attempt {
    Connected,
    Blocked { store_key: String },
}

pub(crate) struct CoordinatorInner {
    pub(crate) session: GatewayNodeSession,
    pub(crate) endpoints: Arc<dyn EndpointStore>,
    pub(crate) handler: Arc<dyn InvokeHandler>,
    pub(crate) trust_store: Arc<dyn TlsTrustStore>,
    pub(crate) permissions: Arc<dyn PermissionProvider>,
    pub(crate) settings: SharedSettings,
    pub(crate) preferences: DiscoveryPreferences,
    pub(crate) registry: CapabilityRegistry,
    pub(crate) identity: NodeIdentity,
    pub(crate) backoff: ReconnectBackoff,
    pub(crate) timing: CoordinatorTiming,
    pub(crate) retry: Mutex<RetryDelay>,
    pub(crate) events: Mutex<Option<EventSender>>,
    pub(crate) status: watch::Sender<NodeStatus>,
    pub(crate) shutdown: Mutex<CancellationToken>,
    pub(crate) stopped: AtomicBool,
}

/// Owns the gateway session and the reconnect loop.
///
/// Create via [`NodeModeCoordinatorBuilder`](crate::builder::NodeModeCoordinatorBuilder).
pub struct NodeModeCoordinator {
    pub(crate) inner: Arc<CoordinatorInner>,
    pub(crate) task: Mutex<Option<JoinHandle<()>>>,
}

impl NodeModeCoordinator {
    pub fn builder() -> crate::builder::NodeModeCoordinatorBuilder {
        crate::builder::NodeModeCoordinatorBuilder::new()
    }

    /// Start the run loop.  No-op while it is already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let shutdown = CancellationToken::new();
        *self.inner.shutdown.lock() = shutdown.clone();
        self.inner.stopped.store(false, Ordering::SeqCst);
        tracing::info!(client_id = %self.inner.identity.client_id, "node mode starting");
        *task = Some(tokio::spawn(self.inner.clone().run_loop(shutdown)));
    }

    /// Cancel any sleep or attempt in progress, wait for the loop to exit,
    /// and disconnect the live session.  No attempt starts after this
    /// returns.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.shutdown.lock().cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "node mode loop failed");
            }
        }
        self.inner.session.disconnect().await;
        self.inner.events.lock().take();
        self.inner.set_status(NodeStatus::Stopped);
        tracing::info!("node mode stopped");
    }

    /// Start, run until `shutdown` fires, then stop.
    pub async fn run_until(&self, shutdown: CancellationToken) {
        self.start();
        shutdown.cancelled().await;
        self.stop().await;
    }

    /// Prefer another discovered gateway.  Drops the live session so the
    /// next attempt resolves against the new preference.
    pub async fn set_preferred_gateway_stable_id(&self, stable_id: Option<String>) {
        tracing::info!(stable_id = ?stable_id, "preferred gateway changed");
        self.inner.preferences.set_preferred_stable_id(stable_id);
        self.inner.session.disconnect().await;
    }

    /// Push an event to the gateway through the live session.
    pub async fn send_event(
        &self,
        event: impl Into<String>,
        payload_json: Option<String>,
    ) -> Result<(), NodeSdkError> {
        let sender = self
            .inner
            .events
            .lock()
            .clone()
            .ok_or(NodeSdkError::NotConnected)?;
        sender.send_event(event, payload_json).await
    }

    pub fn status(&self) -> watch::Receiver<NodeStatus> {
        self.inner.status.subscribe()
    }

    pub fn session(&self) -> &GatewayNodeSession {
        &self.inner.session
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.inner.settings
    }
}

/// Sleep for `d`; `false` when shutdown fired first.
async fn sleep_or_stop(d: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(d) => true,
        _ = shutdown.cancelled() => false,
    }
}

impl CoordinatorInner {
    fn set_status(&self, status: NodeStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    async fn run_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut last_camera: Option<bool> = None;
        let mut blocked: Option<TrustBlock> = None;
        let mut attempt: u32 = 0;

        while !shutdown.is_cancelled() {
            let settings = self.settings.snapshot();
            if settings.paused {
                self.set_status(NodeStatus::Paused);
                if !sleep_or_stop(self.timing.pause_poll, &shutdown).await {
                    break;
                }
                continue;
            }

            match last_camera {
                None => last_camera = Some(settings.camera_enabled),
                Some(prev) if prev != settings.camera_enabled => {
                    last_camera = Some(settings.camera_enabled);
                    tracing::info!(
                        camera_enabled = settings.camera_enabled,
                        "camera setting changed, reconnecting"
                    );
                    self.session.disconnect().await;
                    if !sleep_or_stop(self.timing.settle_delay, &shutdown).await {
                        break;
                    }
                }
                Some(_) => {}
            }

            if self.session.state() != SessionState::Idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.session.closed() => {}
                    _ = tokio::time::sleep(self.timing.connected_poll) => {}
                }
                continue;
            }

            attempt += 1;
            let result = tokio::select! {
                r = self.attempt(&mut blocked) => r,
                _ = shutdown.cancelled() => break,
            };

            match result {
                Ok(Attempt::Connected) => attempt = 0,
                Ok(Attempt::Blocked { store_key }) => {
                    self.set_status(NodeStatus::TrustFailure { store_key });
                    if !sleep_or_stop(self.backoff.max_delay, &shutdown).await {
                        break;
                    }
                }
                Err(e) if e.is_trust_failure() => {
                    tracing::error!(
                        error = %e,
                        "gateway certificate rejected; forget the pin to trust the new certificate"
                    );
                    let store_key = blocked
                        .as_ref()
                        .map(|b| b.store_key.clone())
                        .unwrap_or_default();
                    self.set_status(NodeStatus::TrustFailure { store_key });
                    if !sleep_or_stop(self.backoff.max_delay, &shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    let delay = self.retry.lock().next_delay();
                    if matches!(e, NodeSdkError::NotConfigured(_)) {
                        self.set_status(NodeStatus::NotConfigured);
                    } else {
                        self.set_status(NodeStatus::Backoff { delay });
                    }
                    tracing::error!(
                        attempt,
                        error = %e,
                        kind = ?e.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "gateway connect failed"
                    );
                    if !sleep_or_stop(delay, &shutdown).await {
                        break;
                    }
                }
            }
        }
        tracing::debug!("node mode loop exited");
    }

    /// One connection attempt with fresh caps, commands, and permissions.
    async fn attempt(
        self: &Arc<Self>,
        blocked: &mut Option<TrustBlock>,
    ) -> Result<Attempt, NodeSdkError> {
        // Fails before any network I/O when nothing is paired.
        let endpoint = self.endpoints.require_config().await?;

        let policy = TransportPolicy::for_url(&endpoint.url, self.trust_store.clone())?;
        if let Some(block) = blocked.as_ref() {
            let pinned_now = self.trust_store.load_fingerprint(&block.store_key);
            if block.url == endpoint.url && block.pinned == pinned_now {
                return Ok(Attempt::Blocked {
                    store_key: block.store_key.clone(),
                });
            }
            tracing::info!(store_key = %block.store_key, "trust block lifted");
            *blocked = None;
        }

        self.set_status(NodeStatus::Connecting);
        let settings = self.settings.snapshot();
        let caps = self.registry.current_caps(&settings);
        let commands = self.registry.current_commands(&caps);
        let permissions = current_permissions(self.permissions.as_ref()).await;
        let options = ConnectOptions {
            role: NODE_ROLE.into(),
            scopes: self.identity.scopes.clone(),
            caps,
            commands,
            permissions,
            client_id: self.identity.client_id.clone(),
            client_mode: self.identity.client_mode.clone(),
            client_display_name: self.identity.display_name.clone(),
        };
        tracing::debug!(url = %endpoint.url, caps = ?options.caps, "connect attempt");

        let request = ConnectRequest {
            endpoint: endpoint.clone(),
            options,
            policy: policy.clone(),
        };
        let delegate: Arc<dyn SessionDelegate> = self.clone();
        match self.session.connect(request, delegate).await {
            Ok(_) => Ok(Attempt::Connected),
            Err(e) => {
                if e.is_trust_failure() {
                    if let Some(pinning) = policy.pinning() {
                        let store_key = pinning.params.store_key.clone();
                        *blocked = Some(TrustBlock {
                            url: endpoint.url.clone(),
                            pinned: self.trust_store.load_fingerprint(&store_key),
                            store_key,
                        });
                    }
                }
                Err(e)
            }
        }
    }
}

/// Local teardowns (stop, camera toggle, preference switch) are routine.
fn is_routine_disconnect(reason: DisconnectReason) -> bool {
    reason == DisconnectReason::Requested
}

#[async_trait::async_trait]
impl SessionDelegate for CoordinatorInner {
    async fn on_connected(&self, info: &ConnectedInfo) {
        self.retry.lock().reset();
        *self.events.lock() = Some(info.events.clone());
        self.set_status(NodeStatus::Connected {
            session_id: info.session_id.clone(),
        });
        tracing::info!(
            session_id = %info.session_id,
            gateway_version = %info.gateway_version,
            "node connected to gateway"
        );
    }

    async fn on_disconnected(&self, reason: DisconnectReason) {
        self.events.lock().take();
        if !self.stopped.load(Ordering::SeqCst) {
            self.set_status(NodeStatus::Connecting);
        }
        if is_routine_disconnect(reason) {
            tracing::info!(reason = %reason, "node disconnected from gateway");
        } else {
            tracing::error!(reason = %reason, "node disconnected from gateway");
        }
    }

    async fn on_invoke(&self, request: InvokeRequest) -> InvokeResponse {
        if self.stopped.load(Ordering::SeqCst) {
            return InvokeResponse::failure(
                request.id,
                NodeError::unavailable("UNAVAILABLE: node not ready"),
            );
        }
        self.handler.handle_invoke(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{GatewayEndpointConfig, KnownGateway, KnownGatewaysStore};
    use crate::handler::CommandRouter;

    fn coordinator(endpoints: KnownGatewaysStore) -> NodeModeCoordinator {
        NodeModeCoordinator::builder()
            .endpoints(endpoints)
            .handler(CommandRouter::new())
            .trust_store(crate::trust_store::MemoryTrustStore::new())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn stopped_coordinator_answers_not_ready() {
        let coord = coordinator(KnownGatewaysStore::single(GatewayEndpointConfig::new(
            "ws://127.0.0.1:1",
        )));
        coord.inner.stopped.store(true, Ordering::SeqCst);
        let resp = coord
            .inner
            .on_invoke(InvokeRequest {
                id: "r1".into(),
                command: "system.which".into(),
                params: serde_json::Value::Null,
            })
            .await;
        assert_eq!(resp.id, "r1");
        assert_eq!(
            resp.error.unwrap().message,
            "UNAVAILABLE: node not ready"
        );
    }

    #[test]
    fn only_requested_disconnects_are_routine() {
        assert!(is_routine_disconnect(DisconnectReason::Requested));
        for reason in [
            DisconnectReason::TransportClosed,
            DisconnectReason::AuthFailed,
            DisconnectReason::ProtocolError,
        ] {
            assert!(!is_routine_disconnect(reason), "{reason}");
        }
    }

    #[tokio::test]
    async fn send_event_without_session_fails() {
        let coord = coordinator(KnownGatewaysStore::new(vec![], DiscoveryPreferences::default()));
        assert!(matches!(
            coord.send_event("node.ping", None).await,
            Err(NodeSdkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn trust_block_lifts_when_pin_forgotten() {
        let store = Arc::new(crate::trust_store::MemoryTrustStore::new());
        store.save_fingerprint("127.0.0.1:1", "aa").unwrap();
        let coord = NodeModeCoordinator::builder()
            .endpoints(KnownGatewaysStore::new(
                vec![KnownGateway {
                    stable_id: "gw".into(),
                    endpoint: GatewayEndpointConfig::new("wss://127.0.0.1:1"),
                }],
                DiscoveryPreferences::default(),
            ))
            .handler(CommandRouter::new())
            .shared_trust_store(store.clone())
            .build()
            .unwrap();

        let mut blocked = Some(TrustBlock {
            url: "wss://127.0.0.1:1".into(),
            store_key: "127.0.0.1:1".into(),
            pinned: Some("aa".into()),
        });
        let result = coord.inner.attempt(&mut blocked).await;
        assert!(matches!(result, Ok(Attempt::Blocked { .. })));

        // After the operator forgets the pin the block is lifted; the attempt
        // then proceeds (and fails at the network layer here).
        store.remove_fingerprint("127.0.0.1:1").unwrap();
        let coord_inner = coord.inner.clone();
        let result = tokio::time::timeout(
            Duration::from_secs(15),
            coord_inner.attempt(&mut blocked),
        )
        .await
        .unwrap();
        assert!(blocked.is_none());
        assert!(result.is_err());
    }
}
