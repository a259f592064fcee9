//! TLS pinning policy and the rustls verifier that enforces it.
//!
//! Gateways usually run with self-signed certificates, so trust is anchored
//! on the SHA-256 fingerprint of the leaf certificate rather than on a CA
//! chain, the same way SSH handles host keys:
//!
//! - nothing pinned yet: accept whatever the gateway presents (TOFU) and pin
//!   it once the handshake fully succeeds
//! - pinned: the presented fingerprint must match byte-for-byte
//!
//! Plaintext `ws://` endpoints skip pinning entirely.

use std::sync::Arc;

use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use tokio_tungstenite::tungstenite::http::Uri;

use crate::trust_store::TlsTrustStore;
use crate::types::NodeSdkError;

/// Lowercase hex SHA-256 of a DER certificate.
pub fn fingerprint_der(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Pinning parameters for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPinningParams {
    pub required: bool,
    pub expected_fingerprint: Option<String>,
    pub allow_tofu: bool,
    pub store_key: String,
}

/// Outcome of comparing a presented fingerprint to the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    Matched,
    FirstUse,
    Mismatch,
}

impl TlsPinningParams {
    pub fn from_store(store_key: impl Into<String>, store: &dyn TlsTrustStore) -> Self {
        let store_key = store_key.into();
        let expected = store.load_fingerprint(&store_key);
        Self {
            required: true,
            allow_tofu: expected.is_none(),
            expected_fingerprint: expected,
            store_key,
        }
    }

    pub fn check(&self, presented: &str) -> PinCheck {
        match &self.expected_fingerprint {
            Some(expected) if expected == presented => PinCheck::Matched,
            Some(_) => PinCheck::Mismatch,
            None if self.allow_tofu => PinCheck::FirstUse,
            None => PinCheck::Mismatch,
        }
    }
}

/// `host:port` for a secure endpoint, `None` for plaintext ones.
///
/// The port defaults to 443 when the URL omits it.
pub fn store_key_for(url: &str) -> Result<Option<String>, NodeSdkError> {
    let uri: Uri = url
        .parse()
        .map_err(|e| NodeSdkError::Config(format!("invalid gateway URL {url}: {e}")))?;
    match uri.scheme_str().map(str::to_ascii_lowercase).as_deref() {
        Some("wss") => {
            let host = uri.host().unwrap_or("gateway");
            let port = uri.port_u16().unwrap_or(443);
            Ok(Some(format!("{host}:{port}")))
        }
        Some("ws") => Ok(None),
        other => Err(NodeSdkError::Config(format!(
            "unsupported gateway URL scheme {:?} (expected ws or wss)",
            other.unwrap_or("")
        ))),
    }
}

/// Pinning parameters plus the store the TOFU pin is committed to.
#[derive(Clone)]
pub struct TlsPinning {
    pub params: TlsPinningParams,
    pub store: Arc<dyn TlsTrustStore>,
}

impl TlsPinning {
    /// Persist the first-use fingerprint.  Only called after the gateway
    /// accepted the handshake.
    pub(crate) fn commit(&self, presented: &str) -> Result<(), NodeSdkError> {
        if !self.params.allow_tofu {
            return Ok(());
        }
        self.store
            .save_fingerprint(&self.params.store_key, presented)
    }
}

/// How the session transport secures its socket.
#[derive(Clone, Default)]
pub struct TransportPolicy {
    pinning: Option<TlsPinning>,
}

impl TransportPolicy {
    pub fn plaintext() -> Self {
        Self::default()
    }

    /// Derive the policy for `url`: pinned TLS for `wss`, nothing for `ws`.
    pub fn for_url(url: &str, store: Arc<dyn TlsTrustStore>) -> Result<Self, NodeSdkError> {
        let pinning = store_key_for(url)?.map(|key| TlsPinning {
            params: TlsPinningParams::from_store(key, store.as_ref()),
            store,
        });
        Ok(Self { pinning })
    }

    pub fn pinning(&self) -> Option<&TlsPinning> {
        self.pinning.as_ref()
    }
}

// ── rustls verifier ─────────────────────────────────────────────────

/// What the verifier saw during the TLS handshake.
#[derive(Debug, Default, Clone)]
pub(crate) struct Observed {
    pub presented: Option<String>,
    pub mismatch: bool,
}

/// Accepts exactly the certificates the pinning policy allows.  Signatures
/// are still verified, so the peer must hold the pinned key.
#[derive(Debug)]
struct PinningVerifier {
    params: TlsPinningParams,
    observed: Arc<Mutex<Observed>>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let presented = fingerprint_der(end_entity.as_ref());
        let check = self.params.check(&presented);
        {
            let mut observed = self.observed.lock();
            observed.presented = Some(presented);
            observed.mismatch = check == PinCheck::Mismatch;
        }
        match check {
            PinCheck::Matched | PinCheck::FirstUse => Ok(ServerCertVerified::assertion()),
            PinCheck::Mismatch => Err(rustls::Error::General(
                "gateway certificate fingerprint mismatch".into(),
            )),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a rustls client config that enforces `params` and records what the
/// server presented into `observed`.
pub(crate) fn pinned_client_config(
    params: &TlsPinningParams,
    observed: Arc<Mutex<Observed>>,
) -> Result<rustls::ClientConfig, NodeSdkError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = PinningVerifier {
        params: params.clone(),
        observed,
        provider: provider.clone(),
    };
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| NodeSdkError::Config(format!("TLS config: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}
