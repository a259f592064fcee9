//! Local node settings, shared between the host app and the coordinator.
//!
//! The coordinator polls [`SharedSettings::snapshot`] once per loop
//! iteration instead of subscribing to ambient global state.

use std::sync::Arc;

use cl_protocol::LocationMode;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Point-in-time view of the settings the session cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Global pause: no connection attempts while set.
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub camera_enabled: bool,
    /// Unrecognised values read as `off`.
    #[serde(default, deserialize_with = "lenient_location_mode")]
    pub location_mode: LocationMode,
}

fn lenient_location_mode<'de, D>(deserializer: D) -> Result<LocationMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(LocationMode::from_setting(&raw))
}

/// Thread-safe, cloneable handle to the live settings.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<NodeSettings>>,
}

impl SharedSettings {
    pub fn new(settings: NodeSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> NodeSettings {
        self.inner.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut NodeSettings)) {
        f(&mut self.inner.write());
    }

    pub fn set_paused(&self, paused: bool) {
        self.update(|s| s.paused = paused);
    }

    pub fn set_camera_enabled(&self, enabled: bool) {
        self.update(|s| s.camera_enabled = enabled);
    }

    pub fn set_location_mode(&self, mode: LocationMode) {
        self.update(|s| s.location_mode = mode);
    }
}
