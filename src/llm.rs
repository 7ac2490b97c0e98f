//! Generation service abstraction
//!
//! The chat pipeline talks to the text-generation backend only through
//! [`GenerationService`] (session construction) and [`ChatSession`] (one
//! streamed reply per call).

mod error;
mod gemini;
mod models;
mod sse;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use gemini::{GeminiService, DEFAULT_BASE_URL};
pub use models::{all_models, default_model, find_model, ModelDef};
pub use types::{Fragment, FragmentStream, GenerationConfig};

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Factory for configured conversation sessions
pub trait GenerationService: Send + Sync {
    /// Create a fresh session. Fails with `InvalidConfig` on an unknown model
    /// id or missing credentials.
    fn create_session(&self, config: &GenerationConfig) -> Result<Arc<dyn ChatSession>, LlmError>;
}

/// A stateful conversation held by the generation service
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Send one user message and stream the reply.
    ///
    /// The returned stream ends after the last fragment, or after yielding a
    /// single `Err` if the reply fails midway.
    async fn send_streaming(&self, message: &str) -> Result<FragmentStream, LlmError>;

    /// The configuration this session was created with
    fn config(&self) -> &GenerationConfig;
}

/// Logging wrapper for generation services
pub struct LoggingService {
    inner: Arc<dyn GenerationService>,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn GenerationService>) -> Self {
        Self { inner }
    }
}

impl GenerationService for LoggingService {
    fn create_session(&self, config: &GenerationConfig) -> Result<Arc<dyn ChatSession>, LlmError> {
        match self.inner.create_session(config) {
            Ok(session) => {
                tracing::info!(
                    model = %config.model,
                    instruction_chars = config.system_instruction.chars().count(),
                    "Chat session created"
                );
                Ok(Arc::new(LoggingSession { inner: session }))
            }
            Err(e) => {
                tracing::error!(model = %config.model, error = %e.message, "Chat session creation failed");
                Err(e)
            }
        }
    }
}

struct LoggingSession {
    inner: Arc<dyn ChatSession>,
}

#[async_trait]
impl ChatSession for LoggingSession {
    async fn send_streaming(&self, message: &str) -> Result<FragmentStream, LlmError> {
        let start = Instant::now();
        let model = self.inner.config().model.clone();
        let stream = match self.inner.send_streaming(message).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    "Generation request failed"
                );
                return Err(e);
            }
        };

        tracing::debug!(model = %model, ttfb_ms = %start.elapsed().as_millis(), "Generation stream opened");

        let mut chars = 0usize;
        let logged = stream.inspect(move |item| match item {
            Ok(fragment) => chars += fragment.text.chars().count(),
            Err(e) => {
                tracing::error!(
                    model = %model,
                    duration_ms = %start.elapsed().as_millis(),
                    received_chars = chars,
                    error = %e.message,
                    "Generation stream failed"
                );
            }
        });

        Ok(logged.boxed())
    }

    fn config(&self) -> &GenerationConfig {
        self.inner.config()
    }
}
