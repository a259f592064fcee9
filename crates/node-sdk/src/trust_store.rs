//! Pinned gateway certificate fingerprints, keyed by `host:port`.
//!
//! A stored fingerprint is never replaced by a different one.  Rotating a
//! gateway certificate takes an explicit [`TlsTrustStore::remove_fingerprint`]
//! (e.g. `cl-node trust forget <key>`).

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::NodeSdkError;

/// Persistent fingerprint storage.  Calls are synchronous and cheap enough
/// to run on the connection path.
pub trait TlsTrustStore: Send + Sync + 'static {
    fn load_fingerprint(&self, store_key: &str) -> Option<String>;

    /// Pin `fingerprint` for `store_key`.  Saving the value already stored
    /// is a no-op; saving a different one fails.
    fn save_fingerprint(&self, store_key: &str, fingerprint: &str) -> Result<(), NodeSdkError>;

    /// Returns whether an entry existed.
    fn remove_fingerprint(&self, store_key: &str) -> Result<bool, NodeSdkError>;

    /// All pins, sorted by key.
    fn entries(&self) -> Vec<(String, String)>;
}

fn conflict(store_key: &str) -> NodeSdkError {
    NodeSdkError::TrustStore(format!(
        "{store_key} already has a different pinned fingerprint"
    ))
}

// ── In-memory ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    pins: Mutex<BTreeMap<String, String>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TlsTrustStore for MemoryTrustStore {
    fn load_fingerprint(&self, store_key: &str) -> Option<String> {
        self.pins.lock().get(store_key).cloned()
    }

    fn save_fingerprint(&self, store_key: &str, fingerprint: &str) -> Result<(), NodeSdkError> {
        let mut pins = self.pins.lock();
        match pins.get(store_key) {
            Some(existing) if existing == fingerprint => Ok(()),
            Some(_) => Err(conflict(store_key)),
            None => {
                pins.insert(store_key.to_string(), fingerprint.to_string());
                Ok(())
            }
        }
    }

    fn remove_fingerprint(&self, store_key: &str) -> Result<bool, NodeSdkError> {
        Ok(self.pins.lock().remove(store_key).is_some())
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.pins
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ── File-backed ─────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrustFile {
    #[serde(default = "d_version")]
    version: u32,
    #[serde(default)]
    fingerprints: BTreeMap<String, String>,
}

fn d_version() -> u32 {
    1
}

/// JSON file store.  The file is re-read on every lookup so that pins
/// removed by another process (the CLI) take effect without a restart.
#[derive(Debug)]
pub struct FileTrustStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTrustStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<config dir>/clawlink/gateway-tls.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clawlink")
            .join("gateway-tls.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<TrustFile, NodeSdkError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                NodeSdkError::TrustStore(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TrustFile {
                version: d_version(),
                ..Default::default()
            }),
            Err(e) => Err(NodeSdkError::TrustStore(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write(&self, file: &TrustFile) -> Result<(), NodeSdkError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(file)
            .map_err(|e| NodeSdkError::TrustStore(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| NodeSdkError::TrustStore(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl TlsTrustStore for FileTrustStore {
    fn load_fingerprint(&self, store_key: &str) -> Option<String> {
        match self.read() {
            Ok(file) => file.fingerprints.get(store_key).cloned(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read TLS trust store");
                None
            }
        }
    }

    fn save_fingerprint(&self, store_key: &str, fingerprint: &str) -> Result<(), NodeSdkError> {
        let _guard = self.write_lock.lock();
        let mut file = self.read()?;
        match file.fingerprints.get(store_key) {
            Some(existing) if existing == fingerprint => return Ok(()),
            Some(_) => return Err(conflict(store_key)),
            None => {}
        }
        file.fingerprints
            .insert(store_key.to_string(), fingerprint.to_string());
        self.write(&file)?;
        tracing::info!(store_key = %store_key, path = %self.path.display(), "pinned gateway fingerprint");
        Ok(())
    }

    fn remove_fingerprint(&self, store_key: &str) -> Result<bool, NodeSdkError> {
        let _guard = self.write_lock.lock();
        let mut file = self.read()?;
        if file.fingerprints.remove(store_key).is_none() {
            return Ok(false);
        }
        self.write(&file)?;
        Ok(true)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.read()
            .map(|f| f.fingerprints.into_iter().collect())
            .unwrap_or_default()
    }
}
