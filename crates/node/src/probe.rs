//! Host permission probe.
//!
//! A desktop host has no TCC-style grant database, so grants are inferred
//! from what the machine can actually do.  Config entries override the probe.

use std::collections::BTreeMap;
use std::path::Path;

use cl_node_sdk::{PermissionKind, PermissionProvider, StaticPermissions};

use crate::commands::notify::find_notifier;

pub struct HostPermissions {
    overrides: StaticPermissions,
}

impl HostPermissions {
    pub fn new(overrides: StaticPermissions) -> Self {
        Self { overrides }
    }
}

#[async_trait::async_trait]
impl PermissionProvider for HostPermissions {
    async fn status(&self) -> BTreeMap<PermissionKind, bool> {
        let mut grants = tokio::task::spawn_blocking(probe)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "permission probe failed");
                BTreeMap::new()
            });
        grants.extend(self.overrides.status().await);
        grants
    }
}

fn probe() -> BTreeMap<PermissionKind, bool> {
    let display = std::env::var_os("WAYLAND_DISPLAY").is_some()
        || std::env::var_os("DISPLAY").is_some()
        || cfg!(target_os = "macos");

    BTreeMap::from([
        (PermissionKind::Camera, has_video_device(Path::new("/dev"))),
        (PermissionKind::Notifications, find_notifier().is_some()),
        (PermissionKind::ScreenRecording, display),
        (PermissionKind::Location, false),
    ])
}

fn has_video_device(dev: &Path) -> bool {
    std::fs::read_dir(dev)
        .map(|entries| {
            entries
                .flatten()
                .any(|e| e.file_name().to_string_lossy().starts_with("video"))
        })
        .unwrap_or(false)
}
