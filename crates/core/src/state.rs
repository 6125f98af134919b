//! Exchange state: loop phases, answers and metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::ToolCallRequest;

/// Phase of the agent loop within one exchange.
#[derive(Debug, Clone)]
pub enum Phase {
    /// Waiting for the model to reply to the current history.
    AwaitingModel,
    /// Running the calls requested by the last assistant turn.
    ExecutingTools(Vec<ToolCallRequest>),
    /// The exchange produced its answer.
    Done(Answer),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::AwaitingModel => "awaiting_model",
            Phase::ExecutingTools(_) => "executing_tools",
            Phase::Done(_) => "done",
        }
    }
}

/// Why an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model replied without requesting tools.
    Completed,
    /// The round cap was hit and the answer was synthesized.
    RoundLimit,
}

/// Final answer of an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub stop: StopReason,
    /// Number of tool rounds executed.
    pub rounds: u32,
}

/// Metrics for one exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeMetrics {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of model invocations.
    pub model_calls: u32,
    /// Number of tool calls dispatched.
    pub tool_calls: u32,
    /// Tool calls whose result describes a failure.
    pub tool_errors: u32,
    pub rounds: u32,
}

impl ExchangeMetrics {
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
