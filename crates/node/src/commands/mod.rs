//! Command handlers served by the reference node.

pub mod notify;
pub mod which;

use std::sync::Arc;

use cl_node_sdk::{
    commands, CapabilityRegistry, CommandHandler, CommandResult, CommandRouter, InvokeContext,
    NodeError, NodeSettings,
};

/// Answers every command this host advertises but cannot serve.
pub struct Unsupported;

#[async_trait::async_trait]
impl CommandHandler for Unsupported {
    async fn call(&self, ctx: InvokeContext, _params: serde_json::Value) -> CommandResult {
        Err(NodeError::unavailable(format!(
            "{} is not supported on this host",
            ctx.command
        )))
    }
}

/// Router covering every command the registry may advertise.
pub fn router() -> CommandRouter {
    let mut router = CommandRouter::new();

    // Advertise-able commands under every toggle, so a camera or location
    // change never produces an unknown command.
    let registry = CapabilityRegistry::new();
    let all = NodeSettings {
        camera_enabled: true,
        location_mode: cl_node_sdk::LocationMode::Always,
        ..Default::default()
    };
    let advertised = registry.current_commands(&registry.current_caps(&all));
    router.register_shared(advertised, Arc::new(Unsupported));

    router.register(commands::SYSTEM_WHICH, which::Which);
    router.register(commands::SYSTEM_NOTIFY, notify::Notify);
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_node_sdk::{InvokeHandler, InvokeRequest, NodeErrorCode};

    #[tokio::test]
    async fn unsupported_commands_are_unavailable() {
        let router = router();
        let resp = router
            .handle_invoke(InvokeRequest {
                id: "1".into(),
                command: commands::CAMERA_SNAP.into(),
                params: serde_json::Value::Null,
            })
            .await;
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, NodeErrorCode::Unavailable);
    }

    #[test]
    fn implemented_commands_override_fallback() {
        let names = router().command_names();
        assert!(names.contains(&commands::SYSTEM_WHICH.to_string()));
        assert!(names.contains(&commands::LOCATION_GET.to_string()));
    }

    #[tokio::test]
    async fn unknown_commands_stay_invalid() {
        let resp = router()
            .handle_invoke(InvokeRequest {
                id: "2".into(),
                command: "browser.proxy".into(),
                params: serde_json::Value::Null,
            })
            .await;
        assert_eq!(resp.error.unwrap().code, NodeErrorCode::InvalidRequest);
    }
}
