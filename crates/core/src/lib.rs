//! Core agent loop and types for the interactive chat agent.

use std::time::Duration;

pub mod controller;
pub mod conversation;
pub mod message;
pub mod state;
pub mod tool;

pub use controller::{AgentLoop, ExchangeOutcome, LoopConfig, ModelClient};
pub use conversation::ConversationState;
pub use message::{Message, Role, ToolCallRequest, ToolResult};
pub use state::{Answer, ExchangeMetrics, Phase, StopReason};
pub use tool::{Tool, ToolError, ToolRegistry, ToolSchema};

/// Error types for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Model call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Exchange cancelled")]
    Cancelled,

    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a backend adapter may retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }
}
