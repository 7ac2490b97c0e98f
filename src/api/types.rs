//! API request and response types

use crate::llm::ModelDef;
use crate::persona::QuickPrompt;
use crate::transcript::Message;
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

/// Transcript snapshot
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
    pub busy: bool,
}

/// Response for model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: &'static [ModelDef],
    pub default: String,
}

#[derive(Debug, Serialize)]
pub struct PromptsResponse {
    pub prompts: &'static [QuickPrompt],
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
