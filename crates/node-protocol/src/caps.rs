//! Capability tags, command names, and location modes.
//!
//! These strings are part of the wire contract; the gateway logs and
//! displays them, so they never change once published.

use serde::{Deserialize, Serialize};

/// A feature area a node may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Canvas,
    Screen,
    Camera,
    Location,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Canvas => "canvas",
            Self::Screen => "screen",
            Self::Camera => "camera",
            Self::Location => "location",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the node may use location services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocationMode {
    #[default]
    Off,
    WhileUsing,
    Always,
}

impl LocationMode {
    /// Parse a stored setting; anything unrecognised counts as `Off`.
    pub fn from_setting(raw: &str) -> Self {
        match raw {
            "whileUsing" => Self::WhileUsing,
            "always" => Self::Always,
            _ => Self::Off,
        }
    }
}

/// Command names, grouped by the capability that owns them.
pub mod commands {
    pub const CANVAS_PRESENT: &str = "canvas.present";
    pub const CANVAS_HIDE: &str = "canvas.hide";
    pub const CANVAS_NAVIGATE: &str = "canvas.navigate";
    pub const CANVAS_EVAL: &str = "canvas.eval";
    pub const CANVAS_SNAPSHOT: &str = "canvas.snapshot";

    pub const CANVAS_A2UI_PUSH: &str = "canvas.a2ui.push";
    pub const CANVAS_A2UI_PUSH_JSONL: &str = "canvas.a2ui.pushJSONL";
    pub const CANVAS_A2UI_RESET: &str = "canvas.a2ui.reset";

    pub const SCREEN_RECORD: &str = "screen.record";

    pub const SYSTEM_NOTIFY: &str = "system.notify";
    pub const SYSTEM_WHICH: &str = "system.which";
    pub const SYSTEM_RUN: &str = "system.run";
    pub const SYSTEM_EXEC_APPROVALS_GET: &str = "system.execApprovals.get";
    pub const SYSTEM_EXEC_APPROVALS_SET: &str = "system.execApprovals.set";

    pub const CAMERA_LIST: &str = "camera.list";
    pub const CAMERA_SNAP: &str = "camera.snap";
    pub const CAMERA_CLIP: &str = "camera.clip";

    pub const LOCATION_GET: &str = "location.get";

    /// Commands gated on the `camera` capability.
    pub const CAMERA: &[&str] = &[CAMERA_LIST, CAMERA_SNAP, CAMERA_CLIP];

    /// Commands gated on the `location` capability.
    pub const LOCATION: &[&str] = &[LOCATION_GET];
}
