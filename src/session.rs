//! Single active chat session
//!
//! The [`SessionManager`] owns the one session handle that turns are sent
//! through. Replacing it (init/reconfigure) invalidates any handle fetched
//! earlier; callers re-fetch with [`SessionManager::get_active`] for every
//! turn instead of caching.

use crate::llm::{default_model, ChatSession, GenerationConfig, GenerationService, LlmError};
use crate::persona::BASE_INSTRUCTION;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Bad model or instruction at session creation. No fallback model is tried.
    #[error("Session configuration rejected: {0}")]
    Config(#[source] LlmError),
    #[error("No active session; initialize one first")]
    NotInitialized,
}

/// The effective instruction and model of the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub instruction: String,
    pub model: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instruction: BASE_INSTRUCTION.to_string(),
            model: default_model().id.to_string(),
        }
    }
}

/// Handle to the current conversation context
#[derive(Clone)]
pub struct ActiveSession {
    session: Arc<dyn ChatSession>,
    generation: u64,
}

impl ActiveSession {
    pub fn session(&self) -> &Arc<dyn ChatSession> {
        &self.session
    }

    /// Increments every time the manager creates a session
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn model(&self) -> &str {
        &self.session.config().model
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("model", &self.model())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Owner of the single active session slot
pub struct SessionManager {
    service: Arc<dyn GenerationService>,
    active: Option<ActiveSession>,
    config: SessionConfig,
    lazy_bootstrap: bool,
    generation: u64,
}

impl SessionManager {
    /// Create a manager with an empty slot.
    ///
    /// With `lazy_bootstrap`, [`get_active`](Self::get_active) on an empty slot
    /// creates a session from the default persona and model instead of failing.
    pub fn new(service: Arc<dyn GenerationService>, lazy_bootstrap: bool) -> Self {
        Self {
            service,
            active: None,
            config: SessionConfig::default(),
            lazy_bootstrap,
            generation: 0,
        }
    }

    /// Create a new session and make it current.
    ///
    /// On failure the previous session (if any) stays current.
    pub fn init(&mut self, instruction: &str, model: &str) -> Result<ActiveSession, SessionError> {
        let config = GenerationConfig::new(model, instruction);
        let session = self
            .service
            .create_session(&config)
            .map_err(SessionError::Config)?;

        self.generation += 1;
        let active = ActiveSession {
            session,
            generation: self.generation,
        };
        self.active = Some(active.clone());
        if self.config.model != model {
            tracing::info!(from = %self.config.model, to = %model, "Session model changed");
        }
        self.config = SessionConfig {
            instruction: instruction.to_string(),
            model: model.to_string(),
        };
        tracing::debug!(model = %model, generation = self.generation, "Active session replaced");
        Ok(active)
    }

    /// Same as [`init`](Self::init); called after settings or profile edits.
    pub fn reconfigure(&mut self, instruction: &str, model: &str) -> Result<ActiveSession, SessionError> {
        self.init(instruction, model)
    }

    /// Drop the current session without creating a replacement
    pub fn reset(&mut self) {
        if self.active.take().is_some() {
            tracing::debug!("Active session cleared");
        }
    }

    /// Current session, bootstrapping a default one if allowed
    pub fn get_active(&mut self) -> Result<ActiveSession, SessionError> {
        if let Some(active) = &self.active {
            return Ok(active.clone());
        }
        if !self.lazy_bootstrap {
            return Err(SessionError::NotInitialized);
        }

        tracing::info!("No active session; bootstrapping default persona");
        let defaults = SessionConfig::default();
        self.init(&defaults.instruction, &defaults.model)
    }

    #[cfg(test)]
    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    /// Instruction and model of the most recently created session
    #[cfg(test)]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
