//! `system.which`: resolve executables on `PATH`.
//!
//! Params: `{ "bins": ["git", "ffmpeg"] }` (a single string is accepted too).
//! Returns: `{ "bins": { "git": "/usr/bin/git" } }`; missing binaries are
//! omitted.

use cl_node_sdk::{CommandHandler, CommandResult, InvokeContext, NodeError};

const MAX_BINS: usize = 32;
const MAX_BIN_LEN: usize = 128;

pub struct Which;

#[async_trait::async_trait]
impl CommandHandler for Which {
    async fn call(&self, _ctx: InvokeContext, params: serde_json::Value) -> CommandResult {
        let bins = parse_bins(&params)?;
        let found = tokio::task::spawn_blocking(move || {
            bins.into_iter()
                .filter_map(|bin| {
                    let path = which::which(&bin).ok()?;
                    Some((bin, serde_json::Value::String(path.display().to_string())))
                })
                .collect::<serde_json::Map<_, _>>()
        })
        .await
        .map_err(|e| NodeError::unavailable(format!("which lookup failed: {e}")))?;

        Ok(serde_json::json!({ "bins": found }))
    }
}

fn parse_bins(params: &serde_json::Value) -> Result<Vec<String>, NodeError> {
    let valid = |s: &str| {
        let s = s.trim();
        (!s.is_empty() && s.len() <= MAX_BIN_LEN && !s.contains('/')).then(|| s.to_string())
    };
    let bins: Vec<String> = match params.get("bins").or_else(|| params.get("bin")) {
        Some(serde_json::Value::String(single)) => valid(single).into_iter().collect(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(valid)
            .take(MAX_BINS)
            .collect(),
        _ => Vec::new(),
    };
    if bins.is_empty() {
        return Err(NodeError::invalid_request(
            "system.which requires params.bins (string or array of names)",
        ));
    }
    Ok(bins)
}
