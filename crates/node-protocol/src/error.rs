//! Typed invoke errors returned to the gateway.

use serde::{Deserialize, Serialize};

/// Closed set of error codes a node may answer an invoke with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeErrorCode {
    #[serde(rename = "NOT_PAIRED")]
    NotPaired,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "NODE_BACKGROUND_UNAVAILABLE")]
    BackgroundUnavailable,
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
}

impl NodeErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotPaired => "NOT_PAIRED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BackgroundUnavailable => "NODE_BACKGROUND_UNAVAILABLE",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for NodeErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload of a failed [`InvokeResponse`](crate::InvokeResponse).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct NodeError {
    pub code: NodeErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl NodeError {
    pub fn new(code: NodeErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: None,
            retry_after_ms: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(NodeErrorCode::Unavailable, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(NodeErrorCode::InvalidRequest, message)
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }
}
