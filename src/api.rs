//! HTTP API for the chat service

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::chat::ChatService;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(chat: Arc<ChatService>) -> Self {
        Self { chat }
    }
}
