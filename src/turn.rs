//! Streaming turn controller
//!
//! A [`TurnStream`] drives one user turn through
//! `Idle -> Sending -> Streaming -> Settled`. It is lazy: nothing is sent
//! until the stream is first polled. Each non-empty fragment is yielded
//! verbatim in arrival order. A service failure yields exactly one
//! [`StreamError`] and ends the stream. There is no retry and no
//! cancellation.

use crate::llm::{ChatSession, Fragment, FragmentStream, LlmError};
use crate::session::{ActiveSession, SessionError, SessionManager};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use thiserror::Error;

/// Where a turn is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Created, not yet polled
    Idle,
    /// Message handed to the session, waiting for the reply to open
    Sending,
    /// Reply fragments are arriving
    Streaming,
    Settled(TurnOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOutcome {
    Complete,
    Failed,
}

/// Failures before a turn's stream exists
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failure of an in-flight turn; the underlying cause is kept for logging
#[derive(Debug, Error)]
#[error("Reply stream failed: {0}")]
pub struct StreamError(#[source] pub LlmError);

/// Start a turn against the manager's current session.
///
/// The session handle is bound to the returned stream, so a later
/// reconfigure does not affect this turn.
pub fn send_turn(sessions: &mut SessionManager, user_text: &str) -> Result<TurnStream, TurnError> {
    let text = user_text.trim();
    if text.is_empty() {
        return Err(TurnError::EmptyMessage);
    }
    let active = sessions.get_active()?;
    Ok(TurnStream::new(&active, text))
}

enum Phase {
    Idle {
        session: Arc<dyn ChatSession>,
        message: String,
    },
    Sending(BoxFuture<'static, Result<FragmentStream, LlmError>>),
    Streaming(FragmentStream),
    Settled(TurnOutcome),
}

/// Lazy fragment sequence for one turn
pub struct TurnStream {
    phase: Phase,
    model: String,
    session_generation: u64,
    started: Option<Instant>,
    fragments: usize,
    chars: usize,
}

impl TurnStream {
    pub fn new(active: &ActiveSession, message: impl Into<String>) -> Self {
        Self {
            phase: Phase::Idle {
                session: Arc::clone(active.session()),
                message: message.into(),
            },
            model: active.model().to_string(),
            session_generation: active.generation(),
            started: None,
            fragments: 0,
            chars: 0,
        }
    }

    pub fn state(&self) -> TurnState {
        match &self.phase {
            Phase::Idle { .. } => TurnState::Idle,
            Phase::Sending(_) => TurnState::Sending,
            Phase::Streaming(_) => TurnState::Streaming,
            Phase::Settled(outcome) => TurnState::Settled(*outcome),
        }
    }

    /// Generation of the session this turn is bound to
    pub fn session_generation(&self) -> u64 {
        self.session_generation
    }

    fn settle(&mut self, outcome: TurnOutcome, error: Option<&LlmError>) {
        self.phase = Phase::Settled(outcome);
        let duration_ms = self.started.map_or(0, |s| s.elapsed().as_millis());
        match error {
            None => tracing::info!(
                model = %self.model,
                fragments = self.fragments,
                chars = self.chars,
                duration_ms = %duration_ms,
                "Turn completed"
            ),
            Some(e) => tracing::warn!(
                model = %self.model,
                fragments = self.fragments,
                duration_ms = %duration_ms,
                error = %e,
                error_kind = ?e.kind,
                "Turn failed"
            ),
        }
    }
}

impl Stream for TurnStream {
    type Item = Result<Fragment, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let phase = std::mem::replace(&mut this.phase, Phase::Settled(TurnOutcome::Failed));
            match phase {
                Phase::Idle { session, message } => {
                    this.started = Some(Instant::now());
                    tracing::debug!(model = %this.model, chars = message.chars().count(), "Sending turn");
                    this.phase = Phase::Sending(Box::pin(async move {
                        session.send_streaming(&message).await
                    }));
                }
                Phase::Sending(mut request) => match request.poll_unpin(cx) {
                    Poll::Pending => {
                        this.phase = Phase::Sending(request);
                        return Poll::Pending;
                    }
                    Poll::Ready(Ok(stream)) => this.phase = Phase::Streaming(stream),
                    Poll::Ready(Err(e)) => {
                        this.settle(TurnOutcome::Failed, Some(&e));
                        return Poll::Ready(Some(Err(StreamError(e))));
                    }
                },
                Phase::Streaming(mut stream) => match stream.poll_next_unpin(cx) {
                    Poll::Pending => {
                        this.phase = Phase::Streaming(stream);
                        return Poll::Pending;
                    }
                    Poll::Ready(Some(Ok(fragment))) => {
                        this.phase = Phase::Streaming(stream);
                        if fragment.text.is_empty() {
                            continue;
                        }
                        this.fragments += 1;
                        this.chars += fragment.text.chars().count();
                        return Poll::Ready(Some(Ok(fragment)));
                    }
                    Poll::Ready(Some(Err(e))) => {
                        this.settle(TurnOutcome::Failed, Some(&e));
                        return Poll::Ready(Some(Err(StreamError(e))));
                    }
                    Poll::Ready(None) => {
                        this.settle(TurnOutcome::Complete, None);
                        return Poll::Ready(None);
                    }
                },
                Phase::Settled(outcome) => {
                    this.phase = Phase::Settled(outcome);
                    return Poll::Ready(None);
                }
            }
        }
    }
}
