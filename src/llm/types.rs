//! Common types for talking to a generation service

use super::LlmError;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Sampling temperature applied to every session
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Top-k sampling width applied to every session
pub const DEFAULT_TOP_K: u32 = 40;

/// Extended reasoning budget; zero disables thinking
pub const DEFAULT_THINKING_BUDGET: u32 = 0;

/// Parameters for creating a conversation session
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub system_instruction: String,
    pub temperature: f32,
    pub top_k: u32,
    pub thinking_budget: u32,
}

impl GenerationConfig {
    /// Config with the fixed sampling parameters
    pub fn new(model: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: system_instruction.into(),
            temperature: DEFAULT_TEMPERATURE,
            top_k: DEFAULT_TOP_K,
            thinking_budget: DEFAULT_THINKING_BUDGET,
        }
    }
}

/// An incremental piece of generated text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
}

impl Fragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Fragment sequence produced by one streamed reply.
///
/// An `Err` item terminates the sequence.
pub type FragmentStream = BoxStream<'static, Result<Fragment, LlmError>>;

/// Conversation role as the generation service names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        }
    }
}

/// One completed entry of a session's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: TurnRole,
    pub text: String,
}
