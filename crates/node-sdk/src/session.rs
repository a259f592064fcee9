//! One gateway connection: handshake, invoke dispatch, heartbeat, events.
//!
//! A [`GatewayNodeSession`] carries at most one live link at a time.  After
//! a successful [`connect`](GatewayNodeSession::connect) the link runs in its
//! own task until the transport closes or [`disconnect`](GatewayNodeSession::disconnect)
//! is called, and the delegate hears about it exactly once through
//! `on_disconnected`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cl_protocol::{
    ConnectOptions, InvokeRequest, InvokeResponse, NodeError, WsMessage, PROTOCOL_VERSION,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::endpoint::GatewayEndpointConfig;
use crate::tls::TransportPolicy;
use crate::transport::{self, WsStream};
use crate::types::{DisconnectReason, NodeSdkError, SessionState};

/// Heartbeat intervals without any inbound frame before the link is
/// considered dead.
const SILENCE_INTERVALS: u32 = 3;

const OUTBOUND_QUEUE: usize = 64;

/// Per-session limits and timeouts.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_concurrent_invokes: usize,
    /// Inbound frames larger than this are dropped.
    pub max_request_bytes: usize,
    /// Serialized responses larger than this are replaced by `UNAVAILABLE`.
    pub max_response_bytes: usize,
    /// `None` lets handlers run unbounded.
    pub invoke_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            max_concurrent_invokes: 16,
            max_request_bytes: 4 * 1024 * 1024,
            max_response_bytes: 16 * 1024 * 1024,
            invoke_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl SessionSettings {
    /// Longest accepted heartbeat interval.
    pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Reject values the link task cannot run with.
    pub fn validate(&self) -> Result<(), NodeSdkError> {
        if self.heartbeat_interval.is_zero() {
            return Err(NodeSdkError::Config(
                "heartbeat_interval must be greater than zero".into(),
            ));
        }
        if self.heartbeat_interval > Self::MAX_HEARTBEAT_INTERVAL {
            return Err(NodeSdkError::Config(format!(
                "heartbeat_interval must be at most {}s",
                Self::MAX_HEARTBEAT_INTERVAL.as_secs()
            )));
        }
        if self.max_concurrent_invokes == 0 {
            return Err(NodeSdkError::Config(
                "max_concurrent_invokes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Everything needed for one connection attempt.
#[derive(Clone)]
pub struct ConnectRequest {
    pub endpoint: GatewayEndpointConfig,
    pub options: ConnectOptions,
    pub policy: TransportPolicy,
}

/// Handed to `on_connected`.
#[derive(Clone, Debug)]
pub struct ConnectedInfo {
    pub session_id: String,
    pub gateway_version: String,
    pub events: EventSender,
}

/// Callbacks from a session to its owner.
#[async_trait::async_trait]
pub trait SessionDelegate: Send + Sync + 'static {
    /// Runs once per successful connect, before any invoke is delivered.
    async fn on_connected(&self, info: &ConnectedInfo);

    /// Runs once per successful connect, after the link is closed for sends.
    async fn on_disconnected(&self, reason: DisconnectReason);

    /// Serve one invoke.  Runs in its own task; panics become `UNAVAILABLE`.
    async fn on_invoke(&self, request: InvokeRequest) -> InvokeResponse;
}

/// Pushes one-way `event` frames onto a live link.
#[derive(Clone, Debug)]
pub struct EventSender {
    outbound: mpsc::Sender<WsMessage>,
    closed: CancellationToken,
}

impl EventSender {
    /// Queue an event.  Fails with [`NodeSdkError::NotConnected`] once the
    /// link is closed; never tears the link down.
    pub async fn send_event(
        &self,
        event: impl Into<String>,
        payload_json: Option<String>,
    ) -> Result<(), NodeSdkError> {
        if self.closed.is_cancelled() {
            return Err(NodeSdkError::NotConnected);
        }
        self.outbound
            .send(WsMessage::Event {
                event: event.into(),
                payload_json,
            })
            .await
            .map_err(|_| NodeSdkError::NotConnected)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

struct Link {
    generation: u64,
    closed: CancellationToken,
    reason: Arc<Mutex<Option<DisconnectReason>>>,
    events: EventSender,
    task: JoinHandle<()>,
}

struct SessionInner {
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
}

/// Client side of the node protocol for a single gateway link.
#[derive(Clone)]
pub struct GatewayNodeSession {
    inner: Arc<SessionInner>,
}

impl Default for GatewayNodeSession {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

/// Resets the state to `Idle` if a connect attempt is abandoned.
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(SessionState::Idle);
        }
    }
}

impl GatewayNodeSession {
    pub fn new(settings: SessionSettings) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(SessionInner {
                settings,
                state,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Resolves once the session is back to `Idle`.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Idle).await;
    }

    /// Open the transport, run the handshake, and start the link.
    ///
    /// Returns after `on_connected` has completed.  Fails with
    /// [`NodeSdkError::AlreadyConnected`] unless the session is idle.
    pub async fn connect(
        &self,
        request: ConnectRequest,
        delegate: Arc<dyn SessionDelegate>,
    ) -> Result<ConnectedInfo, NodeSdkError> {
        self.inner.settings.validate()?;
        let claimed = self.inner.state.send_if_modified(|s| {
            if *s == SessionState::Idle {
                *s = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(NodeSdkError::AlreadyConnected);
        }
        let mut guard = ConnectingGuard {
            state: &self.inner.state,
            armed: true,
        };

        let settings = &self.inner.settings;
        let url = request.endpoint.url.as_str();
        tracing::info!(url = %url, "connecting to gateway");

        let opened = transport::open(url, &request.policy, settings.connect_timeout).await?;
        let mut stream = opened.stream;

        let (session_id, gateway_version) =
            match handshake(&mut stream, &request, settings.handshake_timeout).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    let _ = stream.close(None).await;
                    return Err(e);
                }
            };

        // Pin only after the gateway accepted us.
        if let (Some(pinning), Some(presented)) = (
            request.policy.pinning(),
            opened.presented_fingerprint.as_deref(),
        ) {
            if let Err(e) = pinning.commit(presented) {
                tracing::error!(
                    store_key = %pinning.params.store_key,
                    error = %e,
                    "failed to persist gateway fingerprint"
                );
                let _ = stream.close(None).await;
                return Err(e);
            }
        }

        tracing::info!(
            session_id = %session_id,
            gateway_version = %gateway_version,
            "gateway accepted connect"
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let closed = CancellationToken::new();
        let reason = Arc::new(Mutex::new(None));
        let events = EventSender {
            outbound: outbound_tx.clone(),
            closed: closed.clone(),
        };
        let info = ConnectedInfo {
            session_id,
            gateway_version,
            events: events.clone(),
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (start_tx, start_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let link_run = LinkRun {
            inner: self.inner.clone(),
            generation,
            delegate,
            info: info.clone(),
            outbound: outbound_tx,
            closed: closed.clone(),
            reason: reason.clone(),
        };
        let task = tokio::spawn(link_run.run(stream, outbound_rx, start_rx, ready_tx));

        {
            let mut slot = self.inner.link.lock();
            *slot = Some(Link {
                generation,
                closed,
                reason,
                events,
                task,
            });
            self.inner.state.send_replace(SessionState::Connected);
        }
        guard.armed = false;

        let _ = start_tx.send(());
        let _ = ready_rx.await;
        Ok(info)
    }

    /// Close the live link, if any.  Safe to call repeatedly; waits for the
    /// link task (including `on_disconnected`) to finish.
    ///
    /// Must not be awaited from inside `on_connected`.
    pub async fn disconnect(&self) {
        let link = {
            let mut slot = self.inner.link.lock();
            let Some(link) = slot.take() else {
                return;
            };
            self.inner.state.send_replace(SessionState::Disconnecting);
            link
        };
        link.reason
            .lock()
            .get_or_insert(DisconnectReason::Requested);
        link.closed.cancel();
        tracing::info!(generation = link.generation, "disconnect requested");
        if let Err(e) = link.task.await {
            tracing::error!(error = %e, "session task failed");
        }
    }

    /// Event sender for the live link.
    pub fn event_sender(&self) -> Option<EventSender> {
        self.inner.link.lock().as_ref().map(|l| l.events.clone())
    }

    pub async fn send_event(
        &self,
        event: impl Into<String>,
        payload_json: Option<String>,
    ) -> Result<(), NodeSdkError> {
        let events = self.event_sender().ok_or(NodeSdkError::NotConnected)?;
        events.send_event(event, payload_json).await
    }
}

// ── Handshake ───────────────────────────────────────────────────────

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> NodeSdkError {
    NodeSdkError::WebSocket(e.to_string())
}

fn is_policy_close(frame: &Option<CloseFrame<'_>>) -> bool {
    frame.as_ref().is_some_and(|f| f.code == CloseCode::Policy)
}

/// Send `connect` and wait for `connect_ok` / `connect_rejected`.
async fn handshake(
    stream: &mut WsStream,
    request: &ConnectRequest,
    timeout: Duration,
) -> Result<(String, String), NodeSdkError> {
    let hello = WsMessage::Connect {
        protocol_version: PROTOCOL_VERSION,
        options: request.options.clone(),
        token: request.endpoint.token.clone(),
        password: request.endpoint.password.clone(),
    };
    stream
        .send(Message::Text(serde_json::to_string(&hello)?))
        .await
        .map_err(ws_error)?;

    let reply = async {
        while let Some(frame) = stream.next().await {
            match frame.map_err(ws_error)? {
                Message::Text(text) => match serde_json::from_str::<WsMessage>(&text)? {
                    WsMessage::ConnectOk {
                        session_id,
                        gateway_version,
                    } => return Ok((session_id, gateway_version)),
                    WsMessage::ConnectRejected { reason } => {
                        tracing::warn!(reason = %reason, "gateway rejected connect");
                        return Err(NodeSdkError::AuthRejected(reason));
                    }
                    WsMessage::Ping { timestamp } => {
                        stream
                            .send(Message::Text(serde_json::to_string(&WsMessage::Pong {
                                timestamp,
                            })?))
                            .await
                            .map_err(ws_error)?;
                    }
                    other => tracing::debug!(frame = ?other, "ignoring frame during handshake"),
                },
                Message::Close(frame) => {
                    if is_policy_close(&frame) {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        return Err(NodeSdkError::AuthRejected(reason));
                    }
                    return Err(NodeSdkError::WebSocket(
                        "gateway closed the connection during handshake".into(),
                    ));
                }
                _ => {}
            }
        }
        Err::<(String, String), NodeSdkError>(NodeSdkError::WebSocket(
            "connection closed before connect_ok".into(),
        ))
    };

    tokio::time::timeout(timeout, reply)
        .await
        .map_err(|_| NodeSdkError::Timeout("waiting for connect_ok".into()))?
}

// ── Link task ───────────────────────────────────────────────────────

struct LinkRun {
    inner: Arc<SessionInner>,
    generation: u64,
    delegate: Arc<dyn SessionDelegate>,
    info: ConnectedInfo,
    outbound: mpsc::Sender<WsMessage>,
    closed: CancellationToken,
    reason: Arc<Mutex<Option<DisconnectReason>>>,
}

impl LinkRun {
    async fn run(
        self,
        stream: WsStream,
        outbound_rx: mpsc::Receiver<WsMessage>,
        start: oneshot::Receiver<()>,
        ready: oneshot::Sender<()>,
    ) {
        // Wait until the link is installed; proceed even if the connecting
        // caller went away.
        let _ = start.await;

        let (sink, stream) = stream.split();
        let writer = tokio::spawn(write_loop(
            sink,
            outbound_rx,
            self.closed.clone(),
            self.reason.clone(),
        ));

        self.delegate.on_connected(&self.info).await;
        let _ = ready.send(());

        let observed = self.read_loop(stream).await;

        let reason = *self.reason.lock().get_or_insert(observed);
        self.closed.cancel();
        {
            let mut slot = self.inner.link.lock();
            if slot.as_ref().is_some_and(|l| l.generation == self.generation) {
                *slot = None;
                self.inner.state.send_replace(SessionState::Disconnecting);
            }
        }
        tracing::info!(
            session_id = %self.info.session_id,
            reason = %reason,
            "gateway link closed"
        );

        self.delegate.on_disconnected(reason).await;
        if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
            tracing::debug!("writer did not finish in time");
        }
        self.inner.state.send_replace(SessionState::Idle);
    }

    /// Returns the reason the link ended on its own, or `Requested` when
    /// closed locally.
    async fn read_loop(&self, mut stream: SplitStream<WsStream>) -> DisconnectReason {
        let settings = &self.inner.settings;
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_invokes.max(1)));
        let mut inflight = JoinSet::new();

        let hb = settings
            .heartbeat_interval
            .clamp(Duration::from_millis(1), SessionSettings::MAX_HEARTBEAT_INTERVAL);
        let silence = hb.checked_mul(SILENCE_INTERVALS).unwrap_or(Duration::MAX);
        let start = Instant::now();
        let first_tick = start.checked_add(hb).unwrap_or(start);
        let mut heartbeat = tokio::time::interval_at(first_tick, hb);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_rx = start;

        let reason = loop {
            tokio::select! {
                _ = self.closed.cancelled() => break DisconnectReason::Requested,

                Some(_) = inflight.join_next(), if !inflight.is_empty() => {}

                _ = heartbeat.tick() => {
                    if last_rx.elapsed() >= silence {
                        tracing::warn!(
                            silent_ms = last_rx.elapsed().as_millis() as u64,
                            "gateway went silent"
                        );
                        break DisconnectReason::TransportClosed;
                    }
                    self.queue(WsMessage::Ping { timestamp: Utc::now().timestamp_millis() });
                }

                frame = stream.next() => {
                    last_rx = Instant::now();
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            if is_policy_close(&frame) {
                                tracing::warn!("gateway closed the link with a policy violation");
                                break DisconnectReason::AuthFailed;
                            }
                            tracing::info!("gateway closed connection");
                            break DisconnectReason::TransportClosed;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "gateway socket error");
                            break DisconnectReason::TransportClosed;
                        }
                        None => break DisconnectReason::TransportClosed,
                    };

                    if text.len() > settings.max_request_bytes {
                        tracing::warn!(
                            bytes = text.len(),
                            max = settings.max_request_bytes,
                            "inbound frame exceeds max_request_bytes, dropping"
                        );
                        continue;
                    }

                    match serde_json::from_str::<WsMessage>(&text) {
                        Ok(WsMessage::Invoke(request)) => {
                            tracing::debug!(
                                id = %request.id,
                                command = %request.command,
                                "received invoke"
                            );
                            inflight.spawn(dispatch(
                                self.delegate.clone(),
                                request,
                                self.outbound.clone(),
                                permits.clone(),
                                settings.invoke_timeout,
                                settings.max_response_bytes,
                            ));
                        }
                        Ok(WsMessage::Ping { timestamp }) => {
                            self.queue(WsMessage::Pong { timestamp });
                        }
                        Ok(WsMessage::Pong { .. }) => tracing::trace!("received pong"),
                        Ok(WsMessage::ConnectRejected { reason }) => {
                            tracing::warn!(reason = %reason, "gateway revoked the session");
                            break DisconnectReason::AuthFailed;
                        }
                        Ok(other) => tracing::debug!(frame = ?other, "ignoring frame"),
                        Err(e) => match recover_invoke_id(&text) {
                            Some(id) => {
                                tracing::warn!(id = %id, error = %e, "undecodable invoke");
                                self.queue(WsMessage::InvokeResult(InvokeResponse::failure(
                                    id,
                                    NodeError::invalid_request(format!("invalid invoke: {e}")),
                                )));
                            }
                            None => {
                                tracing::error!(error = %e, "malformed frame from gateway");
                                break DisconnectReason::ProtocolError;
                            }
                        },
                    }
                }
            }
        };

        inflight.abort_all();
        reason
    }

    /// Queue a frame from the read path without blocking it.
    fn queue(&self, msg: WsMessage) {
        if let Err(e) = self.outbound.try_send(msg) {
            tracing::warn!(error = %e, "outbound queue unavailable, dropping frame");
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<WsMessage>,
    closed: CancellationToken,
    reason: Arc<Mutex<Option<DisconnectReason>>>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let json = match serde_json::to_string(&msg) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound frame");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json)).await {
            tracing::warn!(error = %e, "gateway write failed");
            reason.lock().get_or_insert(DisconnectReason::TransportClosed);
            closed.cancel();
            break;
        }
    }
    // Anything still queued is dropped with the receiver.
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

/// The `id` of an invoke frame whose body failed to decode.
fn recover_invoke_id(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "invoke" {
        return None;
    }
    value.get("id")?.as_str().map(str::to_owned)
}

/// Run one invoke to exactly one response.
async fn dispatch(
    delegate: Arc<dyn SessionDelegate>,
    request: InvokeRequest,
    outbound: mpsc::Sender<WsMessage>,
    permits: Arc<Semaphore>,
    invoke_timeout: Option<Duration>,
    max_response_bytes: usize,
) {
    let Ok(_permit) = permits.acquire_owned().await else {
        return;
    };
    let id = request.id.clone();
    let command = request.command.clone();

    let call = AssertUnwindSafe(delegate.on_invoke(request)).catch_unwind();
    let outcome = match invoke_timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.ok(),
        None => Some(call.await),
    };

    let response = match outcome {
        None => {
            tracing::warn!(id = %id, command = %command, "invoke timed out");
            InvokeResponse::failure(
                id.clone(),
                NodeError::unavailable(format!("{command} timed out")).retryable(true),
            )
        }
        Some(Err(_panic)) => {
            tracing::error!(id = %id, command = %command, "invoke handler panicked");
            InvokeResponse::failure(id.clone(), NodeError::unavailable("invoke handler panicked"))
        }
        Some(Ok(mut response)) => {
            if response.id != id {
                tracing::warn!(
                    expected = %id,
                    got = %response.id,
                    "handler answered with the wrong id, correcting"
                );
                response.id = id.clone();
            }
            response
        }
    };

    let response = enforce_response_limit(response, max_response_bytes);
    if outbound.send(WsMessage::InvokeResult(response)).await.is_err() {
        tracing::debug!(id = %id, "link closed before invoke result could be sent");
    }
}

fn enforce_response_limit(response: InvokeResponse, max_bytes: usize) -> InvokeResponse {
    let size = match serde_json::to_vec(&response) {
        Ok(bytes) => bytes.len(),
        Err(e) => {
            return InvokeResponse::failure(
                response.id,
                NodeError::unavailable(format!("unserializable result: {e}")),
            )
        }
    };
    if size <= max_bytes {
        return response;
    }
    tracing::warn!(id = %response.id, bytes = size, max = max_bytes, "invoke result too large");
    InvokeResponse::failure(
        response.id,
        NodeError::unavailable(format!("result too large ({size} bytes, max {max_bytes})")),
    )
}
