use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::Uri;

use crate::coordinator::NodeIdentity;
use crate::endpoint::{
    stable_id_for_host_port, stable_id_for_service, DiscoveryPreferences, GatewayEndpointConfig,
    KnownGateway, KnownGatewaysStore,
};
use crate::permissions::{PermissionKind, StaticPermissions};
use crate::reconnect::ReconnectBackoff;
use crate::session::SessionSettings;
use crate::settings::NodeSettings;
use crate::tls::store_key_for;
use crate::trust_store::FileTrustStore;
use crate::types::NodeSdkError;

/// Environment variable consulted for a gateway token when the entry sets
/// neither `token` nor `token_env`.
pub const DEFAULT_TOKEN_ENV: &str = "CL_GATEWAY_TOKEN";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Stable id of the gateway to prefer when several are configured.
    #[serde(default)]
    pub preferred_gateway: Option<String>,
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub gateways: Vec<GatewayEntry>,
    #[serde(default)]
    pub settings: NodeSettings,
    /// Static permission grants, keyed by permission name (`camera`, ...).
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub tls: TlsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "d_client_id")]
    pub client_id: String,
    #[serde(default = "d_display_name")]
    pub display_name: String,
    #[serde(default = "d_client_mode")]
    pub client_mode: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            client_id: d_client_id(),
            display_name: d_display_name(),
            client_mode: d_client_mode(),
            scopes: Vec::new(),
        }
    }
}

fn d_client_id() -> String {
    NodeIdentity::default().client_id
}
fn d_display_name() -> String {
    NodeIdentity::default().display_name
}
fn d_client_mode() -> String {
    "node".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateways
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// DNS-SD identity of a gateway found by Bonjour browsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    #[serde(rename = "type", default = "d_service_type")]
    pub service_type: String,
    #[serde(default = "d_service_domain")]
    pub domain: String,
}

fn d_service_type() -> String {
    "_clawlink-gw._tcp".into()
}
fn d_service_domain() -> String {
    "local.".into()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayEntry {
    /// Defaults to the service identity, else `host:port` of the URL.
    #[serde(default)]
    pub stable_id: Option<String>,
    /// Set for gateways discovered over Bonjour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceIdentity>,
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable holding the token (default `CL_GATEWAY_TOKEN`).
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for GatewayEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayEntry")
            .field("stable_id", &self.stable_id)
            .field("service", &self.service)
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("token_env", &self.token_env)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl GatewayEntry {
    pub fn resolved_stable_id(&self) -> String {
        if let Some(id) = &self.stable_id {
            return id.clone();
        }
        if let Some(svc) = &self.service {
            return stable_id_for_service(&svc.name, &svc.service_type, &svc.domain);
        }
        match self.url.parse::<Uri>() {
            Ok(uri) => {
                let default_port = if uri.scheme_str() == Some("wss") { 443 } else { 80 };
                match uri.host() {
                    Some(host) => stable_id_for_host_port(host, uri.port_u16().unwrap_or(default_port)),
                    None => self.url.clone(),
                }
            }
            Err(_) => self.url.clone(),
        }
    }

    /// Inline token, else the token environment variable.
    pub fn resolved_token(&self) -> Option<String> {
        if self.token.is_some() {
            return self.token.clone();
        }
        let var = self.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV);
        std::env::var(var).ok().filter(|t| !t.is_empty())
    }

    pub fn endpoint(&self) -> GatewayEndpointConfig {
        GatewayEndpointConfig {
            url: self.url.clone(),
            token: self.resolved_token(),
            password: self.password.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "d_10000")]
    pub connect_timeout_ms: u64,
    #[serde(default = "d_10000")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "d_30000")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "d_16")]
    pub max_concurrent_invokes: usize,
    #[serde(default = "d_4mb")]
    pub max_request_bytes: usize,
    #[serde(default = "d_16mb")]
    pub max_response_bytes: usize,
    /// `0` disables the per-invoke timeout.
    #[serde(default = "d_120000")]
    pub invoke_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            max_concurrent_invokes: 16,
            max_request_bytes: 4 * 1024 * 1024,
            max_response_bytes: 16 * 1024 * 1024,
            invoke_timeout_ms: 120_000,
        }
    }
}

impl SessionConfig {
    pub fn to_settings(&self) -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            max_concurrent_invokes: self.max_concurrent_invokes,
            max_request_bytes: self.max_request_bytes,
            max_response_bytes: self.max_response_bytes,
            invoke_timeout: (self.invoke_timeout_ms > 0)
                .then(|| Duration::from_millis(self.invoke_timeout_ms)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_1000")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_10000")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    pub fn to_backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..ReconnectBackoff::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Pinned-fingerprint file (default `<config dir>/clawlink/gateway-tls.json`).
    #[serde(default)]
    pub trust_store_path: Option<PathBuf>,
}

fn d_16() -> usize {
    16
}
fn d_4mb() -> usize {
    4 * 1024 * 1024
}
fn d_16mb() -> usize {
    16 * 1024 * 1024
}
fn d_1000() -> u64 {
    1_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_120000() -> u64 {
    120_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading and conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl NodeConfig {
    /// `<config dir>/clawlink/node.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clawlink")
            .join("node.toml")
    }

    pub fn from_toml(raw: &str) -> Result<Self, NodeSdkError> {
        toml::from_str(raw).map_err(|e| NodeSdkError::Config(e.to_string()))
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, NodeSdkError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml(&raw)
                .map_err(|e| NodeSdkError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(NodeSdkError::Config(format!("{}: {e}", path.display()))),
        }
    }

    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            client_id: self.node.client_id.clone(),
            client_mode: self.node.client_mode.clone(),
            display_name: self.node.display_name.clone(),
            scopes: self.node.scopes.clone(),
        }
    }

    pub fn trust_store_path(&self) -> PathBuf {
        self.tls
            .trust_store_path
            .clone()
            .unwrap_or_else(FileTrustStore::default_path)
    }

    /// Endpoint store over the configured gateways; the preference handle is
    /// seeded from `preferred_gateway`.
    pub fn known_gateways(&self) -> (KnownGatewaysStore, DiscoveryPreferences) {
        let preferences = DiscoveryPreferences::new(self.preferred_gateway.clone());
        let gateways = self
            .gateways
            .iter()
            .map(|g| KnownGateway {
                stable_id: g.resolved_stable_id(),
                endpoint: g.endpoint(),
            })
            .collect();
        (
            KnownGatewaysStore::new(gateways, preferences.clone()),
            preferences,
        )
    }

    /// Static grants; unknown names are ignored (and reported by `validate`).
    pub fn static_permissions(&self) -> StaticPermissions {
        let mut perms = StaticPermissions::default();
        for (name, granted) in &self.permissions {
            if let Some(kind) = permission_kind(name) {
                perms = perms.grant(kind, *granted);
            }
        }
        perms
    }
}

fn permission_kind(name: &str) -> Option<PermissionKind> {
    PermissionKind::ALL.into_iter().find(|k| k.as_str() == name)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl NodeConfig {
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut push = |severity, field: String, message: String| {
            issues.push(ConfigIssue {
                severity,
                field,
                message,
            })
        };

        if self.gateways.is_empty() {
            push(
                ConfigSeverity::Warning,
                "gateways".into(),
                "no gateway configured; the node will stay unpaired".into(),
            );
        }

        let mut seen = std::collections::HashSet::new();
        for (i, gw) in self.gateways.iter().enumerate() {
            if let Err(e) = store_key_for(&gw.url) {
                push(ConfigSeverity::Error, format!("gateways[{i}].url"), e.to_string());
            }
            if gw.url.starts_with("ws://") {
                push(
                    ConfigSeverity::Warning,
                    format!("gateways[{i}].url"),
                    "plaintext ws:// sends credentials unencrypted".into(),
                );
            }
            if !seen.insert(gw.resolved_stable_id()) {
                push(
                    ConfigSeverity::Error,
                    format!("gateways[{i}].stable_id"),
                    format!("duplicate stable id {}", gw.resolved_stable_id()),
                );
            }
        }

        if let Some(preferred) = &self.preferred_gateway {
            if !self.gateways.iter().any(|g| &g.resolved_stable_id() == preferred) {
                push(
                    ConfigSeverity::Warning,
                    "preferred_gateway".into(),
                    format!("{preferred} does not match any configured gateway"),
                );
            }
        }

        if self.node.client_id.is_empty() {
            push(
                ConfigSeverity::Error,
                "node.client_id".into(),
                "client_id must not be empty".into(),
            );
        }

        for name in self.permissions.keys() {
            if permission_kind(name).is_none() {
                push(
                    ConfigSeverity::Warning,
                    format!("permissions.{name}"),
                    "unknown permission".into(),
                );
            }
        }

        let max_heartbeat_ms = SessionSettings::MAX_HEARTBEAT_INTERVAL.as_millis() as u64;
        if self.session.heartbeat_interval_ms == 0 {
            push(
                ConfigSeverity::Error,
                "session.heartbeat_interval_ms".into(),
                "must be greater than 0".into(),
            );
        } else if self.session.heartbeat_interval_ms > max_heartbeat_ms {
            push(
                ConfigSeverity::Error,
                "session.heartbeat_interval_ms".into(),
                format!("must be at most {max_heartbeat_ms}"),
            );
        }
        if self.session.max_concurrent_invokes == 0 {
            push(
                ConfigSeverity::Error,
                "session.max_concurrent_invokes".into(),
                "must be greater than 0".into(),
            );
        }
        if self.reconnect.initial_delay_ms == 0
            || self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms
        {
            push(
                ConfigSeverity::Error,
                "reconnect".into(),
                "initial_delay_ms must be > 0 and <= max_delay_ms".into(),
            );
        }

        issues
    }
}
