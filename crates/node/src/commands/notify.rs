//! `system.notify`: post a desktop notification.
//!
//! Uses `notify-send` on Linux and `osascript` on macOS.
//!
//! Params: `{ "title": "...", "body": "..." }`
//! Returns: `{ "notificationId": "...", "deliveredAtMs": 1700000000000 }`

use std::path::PathBuf;

use cl_node_sdk::{CommandHandler, CommandResult, InvokeContext, NodeError};

const MAX_TEXT_LEN: usize = 4096;

pub struct Notify;

/// How notifications are delivered on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notifier {
    NotifySend(PathBuf),
    Osascript(PathBuf),
}

/// The first notifier found on `PATH`.
pub fn find_notifier() -> Option<Notifier> {
    if let Ok(path) = which::which("notify-send") {
        return Some(Notifier::NotifySend(path));
    }
    if cfg!(target_os = "macos") {
        if let Ok(path) = which::which("osascript") {
            return Some(Notifier::Osascript(path));
        }
    }
    None
}

#[async_trait::async_trait]
impl CommandHandler for Notify {
    async fn call(&self, _ctx: InvokeContext, params: serde_json::Value) -> CommandResult {
        let title = text_arg(&params, "title").unwrap_or_else(|| "ClawLink".into());
        let body = text_arg(&params, "body").unwrap_or_default();

        let notifier = find_notifier()
            .ok_or_else(|| NodeError::unavailable("no notification service on this host"))?;

        let mut cmd = match &notifier {
            Notifier::NotifySend(path) => {
                let mut cmd = tokio::process::Command::new(path);
                cmd.arg("--app-name=ClawLink").arg(&title).arg(&body);
                cmd
            }
            Notifier::Osascript(path) => {
                let mut cmd = tokio::process::Command::new(path);
                cmd.arg("-e").arg(format!(
                    "display notification {} with title {}",
                    applescript_quote(&body),
                    applescript_quote(&title)
                ));
                cmd
            }
        };

        let output = cmd
            .output()
            .await
            .map_err(|e| NodeError::unavailable(format!("notifier: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NodeError::unavailable(format!("notifier failed: {stderr}")));
        }

        tracing::debug!(title = %title, "notification delivered");
        Ok(serde_json::json!({
            "notificationId": uuid::Uuid::new_v4().to_string(),
            "deliveredAtMs": chrono::Utc::now().timestamp_millis(),
        }))
    }
}

fn text_arg(params: &serde_json::Value, key: &str) -> Option<String> {
    let raw = params.get(key)?.as_str()?;
    Some(raw.chars().take(MAX_TEXT_LEN).collect())
}

fn applescript_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
