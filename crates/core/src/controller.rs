//! Agent loop - drives one exchange from user input to final answer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Error;
use crate::conversation::ConversationState;
use crate::message::{Message, Role, ToolCallRequest, ToolResult};
use crate::state::{Answer, ExchangeMetrics, Phase, StopReason};
use crate::tool::{ToolRegistry, ToolSchema};

/// Default number of tool rounds allowed per exchange.
pub const DEFAULT_MAX_ROUNDS: u32 = 8;

const ROUND_LIMIT_RESULT: &str = "Not executed: tool round limit reached for this request.";

/// Trait for the language model backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Produce the next assistant turn for the given history.
    async fn generate(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Message, Error>;
}

#[async_trait]
impl<T: ModelClient + ?Sized> ModelClient for Arc<T> {
    async fn generate(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Message, Error> {
        (**self).generate(history, tools).await
    }
}

/// Limits applied to every exchange.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum number of tool rounds before the answer is synthesized.
    pub max_rounds: u32,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of one exchange.
///
/// On failure `conversation` is the baseline passed to [`AgentLoop::run`],
/// untouched, so the next exchange starts from a consistent history.
#[derive(Debug)]
pub struct ExchangeOutcome {
    pub conversation: ConversationState,
    pub result: Result<Answer, Error>,
    pub metrics: ExchangeMetrics,
}

/// The agent loop.
pub struct AgentLoop<C> {
    client: C,
    registry: Arc<ToolRegistry>,
    config: LoopConfig,
}

impl<C: ModelClient> AgentLoop<C> {
    pub fn new(client: C, registry: Arc<ToolRegistry>, config: LoopConfig) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one exchange: append `input`, then alternate between the model and
    /// the tools until the model answers without requesting tools.
    pub async fn run(
        &self,
        conversation: ConversationState,
        input: impl Into<String>,
        cancel: &CancellationToken,
    ) -> ExchangeOutcome {
        let mut metrics = ExchangeMetrics::default();
        metrics.start();

        let mut working = conversation.clone();
        let result = self
            .drive(&mut working, input.into(), cancel, &mut metrics)
            .await;
        metrics.finish();

        info!(
            model_calls = metrics.model_calls,
            tool_calls = metrics.tool_calls,
            tool_errors = metrics.tool_errors,
            rounds = metrics.rounds,
            duration_ms = metrics.duration_ms().unwrap_or(0),
            ok = result.is_ok(),
            "Exchange finished"
        );

        match result {
            Ok(answer) => ExchangeOutcome {
                conversation: working,
                result: Ok(answer),
                metrics,
            },
            Err(e) => {
                match &e {
                    Error::Cancelled => warn!("Exchange cancelled, conversation rolled back"),
                    _ => debug!(error = %e, "Exchange failed, conversation rolled back"),
                }
                ExchangeOutcome {
                    conversation,
                    result: Err(e),
                    metrics,
                }
            }
        }
    }

    async fn drive(
        &self,
        conversation: &mut ConversationState,
        input: String,
        cancel: &CancellationToken,
        metrics: &mut ExchangeMetrics,
    ) -> Result<Answer, Error> {
        conversation.append(Message::user(input))?;

        let tools = self.registry.describe_all();
        let mut phase = Phase::AwaitingModel;

        loop {
            debug!(phase = phase.name(), round = metrics.rounds, "Agent phase");

            phase = match phase {
                Phase::AwaitingModel => {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }

                    let reply = self.invoke_model(conversation.messages(), tools, cancel).await?;
                    metrics.model_calls += 1;
                    check_reply(&reply)?;

                    let text = reply.content.clone();
                    conversation.append(reply)?;

                    let calls = conversation.last_assistant_tool_calls().to_vec();
                    if calls.is_empty() {
                        Phase::Done(Answer {
                            text,
                            stop: StopReason::Completed,
                            rounds: metrics.rounds,
                        })
                    } else if metrics.rounds >= self.config.max_rounds {
                        Phase::Done(self.cut_off(conversation, &calls, metrics.rounds)?)
                    } else {
                        Phase::ExecutingTools(calls)
                    }
                }

                Phase::ExecutingTools(calls) => {
                    metrics.rounds += 1;
                    metrics.tool_calls += calls.len() as u32;

                    let results = self.execute_round(&calls, cancel).await;
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }

                    for result in results {
                        if result.is_error {
                            metrics.tool_errors += 1;
                        }
                        conversation.append(Message::tool_result(result))?;
                    }
                    Phase::AwaitingModel
                }

                Phase::Done(answer) => return Ok(answer),
            };
        }
    }

    async fn invoke_model(
        &self,
        history: &[Message],
        tools: &[ToolSchema],
        cancel: &CancellationToken,
    ) -> Result<Message, Error> {
        let timeout = self.config.model_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout(timeout, self.client.generate(history, tools)) => match res {
                Ok(reply) => reply,
                Err(_) => Err(Error::Timeout(timeout)),
            },
        }
    }

    /// Run every call of one round concurrently. Results come back in call order.
    async fn execute_round(
        &self,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.execute_call(call, cancel))).await
    }

    async fn execute_call(&self, call: &ToolCallRequest, cancel: &CancellationToken) -> ToolResult {
        let timeout = self.config.tool_timeout;
        let started = Instant::now();
        info!(tool = %call.name, id = %call.id, "Executing tool");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResult::error(&call.id, "Cancelled"),
            res = tokio::time::timeout(timeout, self.registry.dispatch(call)) => match res {
                Ok(result) => result,
                Err(_) => {
                    warn!(tool = %call.name, id = %call.id, "Tool timed out");
                    ToolResult::error(
                        &call.id,
                        format!("Tool '{}' timed out after {}s", call.name, timeout.as_secs()),
                    )
                }
            },
        };

        debug!(
            tool = %call.name,
            id = %call.id,
            is_error = result.is_error,
            duration_ms = started.elapsed().as_millis() as u64,
            "Tool finished"
        );
        result
    }

    /// Answer outstanding calls without running them and synthesize a final turn.
    fn cut_off(
        &self,
        conversation: &mut ConversationState,
        calls: &[ToolCallRequest],
        rounds: u32,
    ) -> Result<Answer, Error> {
        warn!(rounds, requested = calls.len(), "Tool round limit reached");

        for call in calls {
            conversation.append(Message::tool_result(ToolResult::error(
                &call.id,
                ROUND_LIMIT_RESULT,
            )))?;
        }

        let text = format!(
            "I stopped after {rounds} rounds of tool calls without reaching a final answer. \
             Try narrowing the request, or ask me to continue."
        );
        conversation.append(Message::assistant(&text))?;

        Ok(Answer {
            text,
            stop: StopReason::RoundLimit,
            rounds,
        })
    }
}

fn check_reply(reply: &Message) -> Result<(), Error> {
    if reply.role != Role::Assistant {
        return Err(Error::MalformedResponse(format!(
            "expected an assistant message, got {}",
            reply.role
        )));
    }
    if reply.tool_call_id.is_some() {
        return Err(Error::MalformedResponse(
            "assistant message carries a tool_call_id".into(),
        ));
    }

    let mut seen = HashSet::new();
    for call in &reply.tool_calls {
        if call.id.is_empty() || !seen.insert(call.id.as_str()) {
            return Err(Error::MalformedResponse(format!(
                "tool call ids must be unique and non-empty (got {:?})",
                call.id
            )));
        }
    }
    Ok(())
}
