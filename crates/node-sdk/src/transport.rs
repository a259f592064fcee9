//! WebSocket transport: opens `ws://` or pinned `wss://` sockets.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use crate::tls::{pinned_client_config, store_key_for, Observed, TransportPolicy};
use crate::types::NodeSdkError;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open socket plus the certificate fingerprint the gateway presented
/// (secure endpoints only).
pub(crate) struct OpenedTransport {
    pub stream: WsStream,
    pub presented_fingerprint: Option<String>,
}

/// Open the socket for `url` under `policy`.
///
/// Credentials never travel in the URL; they go in the `connect` frame.
pub(crate) async fn open(
    url: &str,
    policy: &TransportPolicy,
    timeout: Duration,
) -> Result<OpenedTransport, NodeSdkError> {
    let secure = store_key_for(url)?.is_some();
    let observed = Arc::new(Mutex::new(Observed::default()));

    let connector = match (secure, policy.pinning()) {
        (true, Some(pinning)) => {
            let config = pinned_client_config(&pinning.params, observed.clone())?;
            Connector::Rustls(Arc::new(config))
        }
        (false, None) => Connector::Plain,
        (true, None) => {
            return Err(NodeSdkError::Config(format!(
                "{url} is a secure endpoint but no TLS pinning policy was given"
            )))
        }
        (false, Some(_)) => {
            return Err(NodeSdkError::Config(format!(
                "{url} is a plaintext endpoint but a TLS pinning policy was given"
            )))
        }
    };

    tracing::debug!(url = %url, secure, "opening gateway transport");
    let attempt = connect_async_tls_with_config(url, None, true, Some(connector));
    let result = tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| NodeSdkError::Timeout(format!("connecting to {url}")))?;

    match result {
        Ok((stream, _response)) => Ok(OpenedTransport {
            stream,
            presented_fingerprint: observed.lock().presented.clone(),
        }),
        Err(e) => {
            let seen = observed.lock().clone();
            if let (true, Some(pinning)) = (seen.mismatch, policy.pinning()) {
                let presented = seen.presented.unwrap_or_default();
                tracing::error!(
                    store_key = %pinning.params.store_key,
                    presented = %presented,
                    "gateway certificate does not match pinned fingerprint"
                );
                return Err(NodeSdkError::TrustMismatch {
                    store_key: pinning.params.store_key.clone(),
                    expected: pinning.params.expected_fingerprint.clone().unwrap_or_default(),
                    presented,
                });
            }
            Err(NodeSdkError::WebSocket(format!("{url}: {e}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust_store::{MemoryTrustStore, TlsTrustStore};

    #[tokio::test]
    async fn secure_url_without_pinning_is_config_error() {
        let err = open(
            "wss://127.0.0.1:1",
            &TransportPolicy::plaintext(),
            Duration::from_secs(1),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, NodeSdkError::Config(_)));
    }

    #[tokio::test]
    async fn plaintext_url_with_pinning_is_config_error() {
        let store: Arc<dyn TlsTrustStore> = Arc::new(MemoryTrustStore::new());
        let policy = TransportPolicy::for_url("wss://127.0.0.1:1", store).unwrap();
        let err = open("ws://127.0.0.1:1", &policy, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, NodeSdkError::Config(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = open(
            &format!("ws://{addr}"),
            &TransportPolicy::plaintext(),
            Duration::from_secs(2),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind(), crate::types::ErrorKind::Transport);
        assert!(!err.is_trust_failure());
    }
}
