//! In-process gateway for integration tests.
//!
//! Boots a WebSocket server on an ephemeral port (optionally behind TLS),
//! answers the `connect` handshake, and hands each accepted link to the test
//! as a [`GatewayConn`] for scripting invokes and close frames.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cl_node_sdk::{
    ConnectOptions, ConnectedInfo, DisconnectReason, InvokeRequest, InvokeResponse,
    SessionDelegate, WsMessage,
};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// How the gateway answers `connect`.
#[derive(Debug, Clone)]
pub enum Reply {
    Accept,
    Reject(String),
}

/// A captured `connect` frame.
#[derive(Debug, Clone)]
pub struct ConnectFrame {
    pub protocol_version: u32,
    pub options: ConnectOptions,
    pub token: Option<String>,
    pub password: Option<String>,
}

/// Handle to one accepted node link.
pub struct GatewayConn {
    pub hello: ConnectFrame,
    pub session_id: String,
    /// Raw frames to the node.
    pub send: mpsc::Sender<Message>,
    /// Parsed frames from the node; `None` once the node closed the link.
    pub recv: mpsc::Receiver<WsMessage>,
}

impl GatewayConn {
    pub async fn send_msg(&self, msg: &WsMessage) {
        let json = serde_json::to_string(msg).unwrap();
        self.send.send(Message::Text(json)).await.unwrap();
    }

    pub async fn send_raw(&self, text: &str) {
        self.send.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn send_invoke(&self, id: &str, command: &str, params: serde_json::Value) {
        self.send_msg(&WsMessage::Invoke(InvokeRequest {
            id: id.into(),
            command: command.into(),
            params,
        }))
        .await;
    }

    /// Next `invoke_result`, skipping pings and events.
    pub async fn next_result(&mut self) -> InvokeResponse {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, self.recv.recv()).await {
                Ok(Some(WsMessage::InvokeResult(resp))) => return resp,
                Ok(Some(_)) => continue,
                Ok(None) => panic!("connection dropped before invoke_result"),
                Err(_) => panic!("timeout waiting for invoke_result"),
            }
        }
    }

    pub async fn invoke(
        &mut self,
        id: &str,
        command: &str,
        params: serde_json::Value,
    ) -> InvokeResponse {
        self.send_invoke(id, command, params).await;
        self.next_result().await
    }

    /// Next frame matching `pred`.
    pub async fn next_matching(&mut self, pred: impl Fn(&WsMessage) -> bool) -> WsMessage {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, self.recv.recv()).await {
                Ok(Some(msg)) if pred(&msg) => return msg,
                Ok(Some(_)) => continue,
                Ok(None) => panic!("connection dropped before expected frame"),
                Err(_) => panic!("timeout waiting for expected frame"),
            }
        }
    }

    /// Wait until the node closes the link.
    pub async fn wait_closed(&mut self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, self.recv.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => panic!("timeout waiting for node to close the link"),
            }
        }
    }
}

pub struct MiniGateway {
    pub addr: SocketAddr,
    pub conns: mpsc::Receiver<GatewayConn>,
    reply: Arc<Mutex<Reply>>,
    /// Number of `connect` frames seen (accepted or not).
    pub handshakes: Arc<AtomicUsize>,
    /// Number of TCP connections accepted.
    pub accepts: Arc<AtomicUsize>,
}

impl MiniGateway {
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn wss_url(&self) -> String {
        format!("wss://{}", self.addr)
    }

    pub fn store_key(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn accept_count(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub async fn next_conn(&mut self) -> GatewayConn {
        tokio::time::timeout(Duration::from_secs(5), self.conns.recv())
            .await
            .expect("timeout waiting for node connection")
            .expect("gateway stopped")
    }
}

/// Plaintext gateway.
pub async fn start_gateway(reply: Reply) -> MiniGateway {
    start(reply, None).await
}

/// Gateway behind TLS with the given server config.
pub async fn start_tls_gateway(reply: Reply, tls: Arc<rustls::ServerConfig>) -> MiniGateway {
    start(reply, Some(tls)).await
}

async fn start(reply: Reply, tls: Option<Arc<rustls::ServerConfig>>) -> MiniGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::channel(8);
    let reply = Arc::new(Mutex::new(reply));
    let handshakes = Arc::new(AtomicUsize::new(0));
    let sessions = Arc::new(AtomicUsize::new(0));
    let accepts = Arc::new(AtomicUsize::new(0));

    let accepted = accepts.clone();
    let state = (reply.clone(), handshakes.clone(), sessions);
    tokio::spawn(async move {
        while let Ok((tcp, _peer)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            let conn_tx = conn_tx.clone();
            let state = state.clone();
            let tls = tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(config) => {
                        let acceptor = tokio_rustls::TlsAcceptor::from(config);
                        // The node aborts the TLS handshake on a pin mismatch.
                        if let Ok(stream) = acceptor.accept(tcp).await {
                            serve(stream, state, conn_tx).await;
                        }
                    }
                    None => serve(tcp, state, conn_tx).await,
                }
            });
        }
    });

    MiniGateway {
        addr,
        conns: conn_rx,
        reply,
        handshakes,
        accepts,
    }
}

type SharedState = (Arc<Mutex<Reply>>, Arc<AtomicUsize>, Arc<AtomicUsize>);

async fn serve<S>(stream: S, state: SharedState, conn_tx: mpsc::Sender<GatewayConn>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reply, handshakes, sessions) = state;
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();

    let hello = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(WsMessage::Connect {
                    protocol_version,
                    options,
                    token,
                    password,
                }) = serde_json::from_str(&text)
                {
                    break ConnectFrame {
                        protocol_version,
                        options,
                        token,
                        password,
                    };
                }
            }
            _ => return,
        }
    };
    handshakes.fetch_add(1, Ordering::SeqCst);

    let current = reply.lock().unwrap().clone();
    if let Reply::Reject(reason) = current {
        let json = serde_json::to_string(&WsMessage::ConnectRejected { reason }).unwrap();
        let _ = sink.send(Message::Text(json)).await;
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    let session_id = format!("sess-{}", sessions.fetch_add(1, Ordering::SeqCst) + 1);
    let ok = WsMessage::ConnectOk {
        session_id: session_id.clone(),
        gateway_version: "0.0.0-test".into(),
    };
    if sink
        .send(Message::Text(serde_json::to_string(&ok).unwrap()))
        .await
        .is_err()
    {
        return;
    }

    let (to_node_tx, mut to_node_rx) = mpsc::channel::<Message>(16);
    let (from_node_tx, from_node_rx) = mpsc::channel::<WsMessage>(64);
    let _ = conn_tx
        .send(GatewayConn {
            hello,
            session_id,
            send: to_node_tx,
            recv: from_node_rx,
        })
        .await;

    let read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => {
                    if let Ok(parsed) = serde_json::from_str::<WsMessage>(&text) {
                        let _ = from_node_tx.send(parsed).await;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    let write_task = tokio::spawn(async move {
        while let Some(msg) = to_node_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let _ = tokio::join!(read_task, write_task);
}

// ── TLS material ────────────────────────────────────────────────────────

/// Self-signed server config plus the leaf certificate DER.
pub fn self_signed_tls() -> (Arc<rustls::ServerConfig>, Vec<u8>) {
    let certified = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let cert_der = certified.cert.der().clone();
    let key = rustls::pki_types::PrivateKeyDer::Pkcs8(certified.key_pair.serialize_der().into());
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert_der.clone()], key)
    .unwrap();
    (Arc::new(config), cert_der.to_vec())
}

// ── Recording delegate ──────────────────────────────────────────────────

/// Session delegate that records callbacks and serves a few test commands:
///
/// - `test.echo` → `{"echoed": params}`
/// - `test.panic` → panics
/// - `test.wrong_id` → answers with a different id
/// - `test.sleep` → sleeps `params.ms` then answers `{"slept": ms}`
#[derive(Default)]
pub struct RecordingDelegate {
    pub connected: Mutex<Vec<ConnectedInfo>>,
    pub disconnected: Mutex<Vec<DisconnectReason>>,
    notify: Mutex<Option<mpsc::UnboundedSender<DisconnectReason>>>,
}

impl RecordingDelegate {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DisconnectReason>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let delegate = Self {
            notify: Mutex::new(Some(tx)),
            ..Default::default()
        };
        (Arc::new(delegate), rx)
    }

    pub fn disconnects(&self) -> Vec<DisconnectReason> {
        self.disconnected.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connected.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl SessionDelegate for RecordingDelegate {
    async fn on_connected(&self, info: &ConnectedInfo) {
        self.connected.lock().unwrap().push(info.clone());
    }

    async fn on_disconnected(&self, reason: DisconnectReason) {
        self.disconnected.lock().unwrap().push(reason);
        if let Some(tx) = self.notify.lock().unwrap().as_ref() {
            let _ = tx.send(reason);
        }
    }

    async fn on_invoke(&self, request: InvokeRequest) -> InvokeResponse {
        match request.command.as_str() {
            "test.echo" => {
                InvokeResponse::success(request.id, serde_json::json!({ "echoed": request.params }))
            }
            "test.panic" => panic!("intentional panic for testing catch_unwind"),
            "test.wrong_id" => InvokeResponse::success("not-the-request-id", serde_json::Value::Null),
            "test.sleep" => {
                let ms = request.params["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                InvokeResponse::success(request.id, serde_json::json!({ "slept": ms }))
            }
            other => InvokeResponse::failure(
                request.id,
                cl_node_sdk::NodeError::invalid_request(format!("unknown command: {other}")),
            ),
        }
    }
}

/// Connect options resembling a real node.
pub fn test_options() -> ConnectOptions {
    ConnectOptions {
        role: "node".into(),
        scopes: vec![],
        caps: vec!["canvas".into(), "screen".into()],
        commands: vec!["canvas.present".into(), "system.which".into()],
        permissions: [("camera".to_string(), false), ("notifications".to_string(), true)]
            .into_iter()
            .collect(),
        client_id: "clawlink-test".into(),
        client_mode: "node".into(),
        client_display_name: "Integration Test Node".into(),
    }
}
