//! Conversation log.
//!
//! Append-only record of the turns in a session. Every assistant turn that
//! requests tools must be answered by exactly one tool message per call
//! before any further user or assistant turn is accepted.

use std::collections::HashSet;

use crate::Error;
use crate::message::{Message, Role, ToolCallRequest};

/// Ordered message log for one session.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation seeded with an instruction message.
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    /// Append a message, enforcing the tool call pairing rules.
    pub fn append(&mut self, message: Message) -> Result<(), Error> {
        if !message.tool_calls.is_empty() && message.role != Role::Assistant {
            return Err(Error::InvalidTranscript(format!(
                "{} message cannot carry tool calls",
                message.role
            )));
        }

        match message.role {
            Role::System => {
                if !self.messages.is_empty() {
                    return Err(Error::InvalidTranscript(
                        "system message must be the first message".into(),
                    ));
                }
            }
            Role::User | Role::Assistant => {
                let pending = self.pending_tool_calls();
                if !pending.is_empty() {
                    let ids: Vec<&str> = pending.iter().map(|c| c.id.as_str()).collect();
                    return Err(Error::InvalidTranscript(format!(
                        "{} message appended while tool calls are unanswered: {}",
                        message.role,
                        ids.join(", ")
                    )));
                }
                check_call_ids(&message.tool_calls)?;
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().ok_or_else(|| {
                    Error::InvalidTranscript("tool message without tool_call_id".into())
                })?;
                if !self.pending_tool_calls().iter().any(|c| c.id == id) {
                    return Err(Error::InvalidTranscript(format!(
                        "tool result {id} does not match an outstanding call"
                    )));
                }
            }
        }

        self.messages.push(message);
        Ok(())
    }

    /// All messages in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Tool calls of the most recent assistant turn (empty if none).
    pub fn last_assistant_tool_calls(&self) -> &[ToolCallRequest] {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.tool_calls.as_slice())
            .unwrap_or(&[])
    }

    /// Calls from the most recent assistant turn that have no result yet.
    pub fn pending_tool_calls(&self) -> Vec<&ToolCallRequest> {
        let Some(pos) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[pos + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.messages[pos]
            .tool_calls
            .iter()
            .filter(|c| !answered.contains(c.id.as_str()))
            .collect()
    }

    /// True when no tool call is waiting for a result.
    pub fn is_settled(&self) -> bool {
        self.pending_tool_calls().is_empty()
    }

    /// Number of user turns recorded so far.
    pub fn exchange_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn check_call_ids(calls: &[ToolCallRequest]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for call in calls {
        if call.id.is_empty() {
            return Err(Error::InvalidTranscript(format!(
                "tool call to {} has an empty id",
                call.name
            )));
        }
        if !seen.insert(call.id.as_str()) {
            return Err(Error::InvalidTranscript(format!(
                "duplicate tool call id {}",
                call.id
            )));
        }
    }
    Ok(())
}
