use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure raised by any model call, either by the transport or while
/// turning the reply into the structured shape the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ModelError {
    #[error("model output was malformed: {0}")]
    MalformedOutput(String),
    #[error("model provider rate limited the request: {0}")]
    RateLimited(String),
    #[error("model request timed out: {0}")]
    Timeout(String),
    #[error("model provider failed: {0}")]
    Upstream(String),
}

impl ModelError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedOutput(message.into())
    }

    /// Rate limits and timeouts are expected to clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedOutput(_))
    }
}
