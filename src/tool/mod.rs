#![allow(dead_code)]

//! Tool invocation seam
//!
//! Steps execute against opaque connectors (LLM providers, REST APIs, vector
//! stores) behind the [`ToolInvoker`] trait. The engine never knows what a
//! target actually is; it hands over the bound step and gets a JSON value or
//! a classified error back.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Errors from a tool invocation
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The call exceeded its deadline
    #[error("tool call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// Rate limited by the provider
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimit { retry_after: Option<Duration> },

    /// Network error reaching the target
    #[error("network error: {message}")]
    Network { message: String },

    /// Target exists but is temporarily unavailable
    #[error("target unavailable: {message}")]
    Unavailable { message: String },

    /// The request itself was rejected (unknown target/action, bad input)
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The tool ran and reported failure
    #[error("tool failed: {message}")]
    Failed { message: String },
}

impl ToolError {
    /// Whether a retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolError::Timeout { .. }
                | ToolError::RateLimit { .. }
                | ToolError::Network { .. }
                | ToolError::Unavailable { .. }
        )
    }

    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    pub fn rate_limit(retry_after: Option<Duration>) -> Self {
        Self::RateLimit { retry_after }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// A fully bound invocation, as handed to a connector
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub target: String,
    pub action: String,
    pub intent: Option<String>,
    pub params: Map<String, Value>,
    pub payload: Option<Value>,
}

/// Connector interface for step execution
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke the target and return its result value
    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError>;
}

#[async_trait]
impl ToolInvoker for Box<dyn ToolInvoker> {
    async fn invoke(&self, call: &ToolCall) -> Result<Value, ToolError> {
        (**self).invoke(call).await
    }
}
