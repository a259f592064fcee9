//! Gateway endpoint resolution and discovery preference.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::NodeSdkError;

/// Resolved gateway target.  Token and password are opaque to the session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEndpointConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl GatewayEndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            password: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for GatewayEndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayEndpointConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Resolves which gateway to connect to.
#[async_trait::async_trait]
pub trait EndpointStore: Send + Sync + 'static {
    /// The endpoint to use right now, or [`NodeSdkError::NotConfigured`].
    async fn require_config(&self) -> Result<GatewayEndpointConfig, NodeSdkError>;
}

/// Which discovered gateway the user prefers.  Shared between the
/// coordinator (writer) and endpoint stores (readers).
#[derive(Debug, Clone, Default)]
pub struct DiscoveryPreferences {
    preferred: Arc<RwLock<Option<String>>>,
}

impl DiscoveryPreferences {
    pub fn new(preferred: Option<String>) -> Self {
        Self {
            preferred: Arc::new(RwLock::new(preferred)),
        }
    }

    pub fn preferred_stable_id(&self) -> Option<String> {
        self.preferred.read().clone()
    }

    pub fn set_preferred_stable_id(&self, stable_id: Option<String>) {
        *self.preferred.write() = stable_id;
    }
}

/// A gateway the node knows about, keyed by its stable id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownGateway {
    pub stable_id: String,
    pub endpoint: GatewayEndpointConfig,
}

/// Endpoint store over a fixed list of known gateways.  The preferred
/// stable id wins; otherwise the first entry is used.
#[derive(Debug, Clone)]
pub struct KnownGatewaysStore {
    gateways: Vec<KnownGateway>,
    preferences: DiscoveryPreferences,
}

impl KnownGatewaysStore {
    pub fn new(gateways: Vec<KnownGateway>, preferences: DiscoveryPreferences) -> Self {
        Self {
            gateways,
            preferences,
        }
    }

    /// Single-gateway store.
    pub fn single(endpoint: GatewayEndpointConfig) -> Self {
        let stable_id = endpoint.url.clone();
        Self::new(
            vec![KnownGateway {
                stable_id,
                endpoint,
            }],
            DiscoveryPreferences::default(),
        )
    }

    pub fn resolve(&self) -> Result<GatewayEndpointConfig, NodeSdkError> {
        if let Some(preferred) = self.preferences.preferred_stable_id() {
            if let Some(gw) = self.gateways.iter().find(|g| g.stable_id == preferred) {
                return Ok(gw.endpoint.clone());
            }
            tracing::debug!(stable_id = %preferred, "preferred gateway not known, using default");
        }
        self.gateways
            .first()
            .map(|g| g.endpoint.clone())
            .ok_or_else(|| NodeSdkError::NotConfigured("no gateway paired".into()))
    }
}

#[async_trait::async_trait]
impl EndpointStore for KnownGatewaysStore {
    async fn require_config(&self) -> Result<GatewayEndpointConfig, NodeSdkError> {
        self.resolve()
    }
}

// ── Stable ids ──────────────────────────────────────────────────────

/// Stable id for a Bonjour service: `type|domain|name`, with DNS-SD `\DDD`
/// escapes decoded and whitespace collapsed in the name.
pub fn stable_id_for_service(name: &str, service_type: &str, domain: &str) -> String {
    let name = decode_bonjour_escapes(name);
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{service_type}|{domain}|{name}")
}

/// Stable id for a plain host/port endpoint.
pub fn stable_id_for_host_port(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

/// Decode DNS-SD `\DDD` (decimal byte) escapes, e.g. `\032` → space.
pub fn decode_bonjour_escapes(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(u8::is_ascii_digit)
        {
            let value = (bytes[i + 1] - b'0') as u32 * 100
                + (bytes[i + 2] - b'0') as u32 * 10
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(b) = u8::try_from(value) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gw(id: &str, url: &str) -> KnownGateway {
        KnownGateway {
            stable_id: id.into(),
            endpoint: GatewayEndpointConfig::new(url),
        }
    }

    #[test]
    fn stable_id_decodes_and_normalizes_name() {
        assert_eq!(
            stable_id_for_service("Claw\\032Gateway   \\032  Node\n", "_clawlink-gw._tcp", "local."),
            "_clawlink-gw._tcp|local.|Claw Gateway Node"
        );
    }

    #[test]
    fn host_port_stable_id() {
        assert_eq!(stable_id_for_host_port("127.0.0.1", 4242), "127.0.0.1:4242");
    }

    #[test]
    fn escapes_decode_without_leftovers() {
        let pretty = decode_bonjour_escapes("Claw\\032Gateway");
        assert_eq!(pretty, "Claw Gateway");
        assert!(!pretty.contains("\\032"));
        // Not an escape: too few digits, or out of byte range.
        assert_eq!(decode_bonjour_escapes("a\\03"), "a\\03");
        assert_eq!(decode_bonjour_escapes("a\\999b"), "a\\999b");
    }

    #[test]
    fn preferred_gateway_wins() {
        let prefs = DiscoveryPreferences::default();
        let store = KnownGatewaysStore::new(
            vec![gw("home", "ws://home:18789"), gw("office", "wss://office:443")],
            prefs.clone(),
        );
        assert_eq!(store.resolve().unwrap().url, "ws://home:18789");

        prefs.set_preferred_stable_id(Some("office".into()));
        assert_eq!(store.resolve().unwrap().url, "wss://office:443");

        prefs.set_preferred_stable_id(Some("gone".into()));
        assert_eq!(store.resolve().unwrap().url, "ws://home:18789");
    }

    #[test]
    fn empty_store_is_not_configured() {
        let store = KnownGatewaysStore::new(vec![], DiscoveryPreferences::default());
        let err = store.resolve().unwrap_err();
        assert!(matches!(err, NodeSdkError::NotConfigured(_)));
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = GatewayEndpointConfig::new("wss://gw")
            .with_token("s3cret")
            .with_password("hunter2");
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("s3cret"));
        assert!(!dbg.contains("hunter2"));
    }
}
