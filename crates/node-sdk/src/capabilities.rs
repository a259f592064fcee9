//! Capability registry: which caps and commands this node advertises.
//!
//! Order matters.  The gateway displays the lists as a stable signature, so
//! baseline entries come first and conditional ones follow in a fixed
//! priority order.

use cl_protocol::{commands, Capability, LocationMode};

use crate::settings::NodeSettings;

/// Computes the advertised capability and command tags.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    baseline_caps: Vec<Capability>,
    baseline_commands: Vec<&'static str>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self {
            baseline_caps: vec![Capability::Canvas, Capability::Screen],
            baseline_commands: vec![
                commands::CANVAS_PRESENT,
                commands::CANVAS_HIDE,
                commands::CANVAS_NAVIGATE,
                commands::CANVAS_EVAL,
                commands::CANVAS_SNAPSHOT,
                commands::CANVAS_A2UI_PUSH,
                commands::CANVAS_A2UI_PUSH_JSONL,
                commands::CANVAS_A2UI_RESET,
                commands::SCREEN_RECORD,
                commands::SYSTEM_NOTIFY,
                commands::SYSTEM_WHICH,
                commands::SYSTEM_RUN,
                commands::SYSTEM_EXEC_APPROVALS_GET,
                commands::SYSTEM_EXEC_APPROVALS_SET,
            ],
        }
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capability tags for the given settings snapshot.
    pub fn current_caps(&self, settings: &NodeSettings) -> Vec<String> {
        let mut caps: Vec<String> = self
            .baseline_caps
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        if settings.camera_enabled {
            caps.push(Capability::Camera.as_str().to_string());
        }
        if settings.location_mode != LocationMode::Off {
            caps.push(Capability::Location.as_str().to_string());
        }
        caps
    }

    /// Command tags consistent with `caps`: never a command whose
    /// capability is absent.
    pub fn current_commands(&self, caps: &[String]) -> Vec<String> {
        let has = |cap: Capability| caps.iter().any(|c| c == cap.as_str());

        let mut out: Vec<String> = self
            .baseline_commands
            .iter()
            .map(|c| c.to_string())
            .collect();
        if has(Capability::Camera) {
            out.extend(commands::CAMERA.iter().map(|c| c.to_string()));
        }
        if has(Capability::Location) {
            out.extend(commands::LOCATION.iter().map(|c| c.to_string()));
        }
        out
    }
}
