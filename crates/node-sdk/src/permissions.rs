//! Permission snapshot provider.
//!
//! Grants are re-queried on every connection attempt: the user may revoke
//! camera access while the node is disconnected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// OS-level permissions a node reports to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKind {
    AppleScript,
    Notifications,
    Accessibility,
    ScreenRecording,
    Microphone,
    SpeechRecognition,
    Camera,
    Location,
}

impl PermissionKind {
    pub const ALL: [PermissionKind; 8] = [
        Self::AppleScript,
        Self::Notifications,
        Self::Accessibility,
        Self::ScreenRecording,
        Self::Microphone,
        Self::SpeechRecognition,
        Self::Camera,
        Self::Location,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppleScript => "appleScript",
            Self::Notifications => "notifications",
            Self::Accessibility => "accessibility",
            Self::ScreenRecording => "screenRecording",
            Self::Microphone => "microphone",
            Self::SpeechRecognition => "speechRecognition",
            Self::Camera => "camera",
            Self::Location => "location",
        }
    }
}

/// Implement this to report the host's permission grants.
#[async_trait::async_trait]
pub trait PermissionProvider: Send + Sync + 'static {
    async fn status(&self) -> BTreeMap<PermissionKind, bool>;
}

/// Fixed grants, e.g. from the config file or tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    grants: BTreeMap<PermissionKind, bool>,
}

impl StaticPermissions {
    pub fn new(grants: BTreeMap<PermissionKind, bool>) -> Self {
        Self { grants }
    }

    pub fn grant(mut self, kind: PermissionKind, granted: bool) -> Self {
        self.grants.insert(kind, granted);
        self
    }
}

#[async_trait::async_trait]
impl PermissionProvider for StaticPermissions {
    async fn status(&self) -> BTreeMap<PermissionKind, bool> {
        self.grants.clone()
    }
}

/// Snapshot the provider into the wire map (`permission name -> granted`).
pub async fn current_permissions(provider: &dyn PermissionProvider) -> BTreeMap<String, bool> {
    provider
        .status()
        .await
        .into_iter()
        .map(|(kind, granted)| (kind.as_str().to_string(), granted))
        .collect()
}
