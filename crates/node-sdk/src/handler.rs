//! Invoke handling: the capability layer the coordinator delegates to, plus
//! a command router that maps command names to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use cl_protocol::{InvokeRequest, InvokeResponse, NodeError};

/// The capability implementation layer.  Every call must resolve to exactly
/// one response; panics are caught by the session and answered with
/// `UNAVAILABLE`.
#[async_trait::async_trait]
pub trait InvokeHandler: Send + Sync + 'static {
    async fn handle_invoke(&self, request: InvokeRequest) -> InvokeResponse;
}

/// Context passed to a [`CommandHandler`].
#[derive(Clone, Debug)]
pub struct InvokeContext {
    /// Correlation ID of the invoke being served.
    pub request_id: String,
    pub command: String,
}

/// Result type for command handlers.
pub type CommandResult = Result<serde_json::Value, NodeError>;

/// Implement this trait to serve one command.
///
/// # Example
///
/// ```rust,no_run
/// use cl_node_sdk::{CommandHandler, CommandResult, InvokeContext};
///
/// struct Ping;
///
/// #[async_trait::async_trait]
/// impl CommandHandler for Ping {
///     async fn call(&self, _ctx: InvokeContext, _params: serde_json::Value) -> CommandResult {
///         Ok(serde_json::json!({ "pong": true }))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn call(&self, ctx: InvokeContext, params: serde_json::Value) -> CommandResult;
}

/// Routes invokes to registered [`CommandHandler`]s by exact command name.
///
/// Unknown commands are answered with `INVALID_REQUEST`.
#[derive(Clone, Default)]
pub struct CommandRouter {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.  Returns `&mut Self` for method chaining.
    pub fn register<H: CommandHandler>(&mut self, command: impl Into<String>, handler: H) -> &mut Self {
        self.handlers.insert(command.into(), Arc::new(handler));
        self
    }

    /// Register one shared handler for several commands.
    pub fn register_shared<I, S>(&mut self, commands: I, handler: Arc<dyn CommandHandler>) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for command in commands {
            self.handlers.insert(command.into(), handler.clone());
        }
        self
    }

    /// All registered command names (sorted).
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, command: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(command).cloned()
    }
}

#[async_trait::async_trait]
impl InvokeHandler for CommandRouter {
    async fn handle_invoke(&self, request: InvokeRequest) -> InvokeResponse {
        let Some(handler) = self.get(&request.command) else {
            tracing::warn!(command = %request.command, "no handler registered for command");
            return InvokeResponse::failure(
                request.id,
                NodeError::invalid_request(format!("unknown command: {}", request.command)),
            );
        };

        let ctx = InvokeContext {
            request_id: request.id.clone(),
            command: request.command.clone(),
        };
        match handler.call(ctx, request.params).await {
            Ok(result) => InvokeResponse::success(request.id, result),
            Err(error) => InvokeResponse::failure(request.id, error),
        }
    }
}
