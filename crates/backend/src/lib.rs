//! Model backend integration for the agent system.
//!
//! Talks to OpenAI-compatible `chat/completions` endpoints.

pub mod client;
pub mod wire;

pub use client::{OpenAiClient, OpenAiConfig};
pub use wire::{ChatRequest, ChatResponse, Usage, WireMessage};
