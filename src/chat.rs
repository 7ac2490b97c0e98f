//! Chat service
//!
//! Ties the session manager, the transcript and the turn controller together
//! behind one shareable handle. Only one turn runs at a time; its fragments
//! are folded into the streaming bot message and every change is broadcast
//! to subscribers as a [`ChatEvent`].

use crate::llm::{find_model, GenerationService, LlmError};
use crate::persona::{compose, ProfileContext, BASE_INSTRUCTION, FALLBACK_REPLY, GREETING};
use crate::session::{SessionError, SessionManager};
use crate::transcript::{Draft, IdGenerator, Message, MessageId, Role, Transcript, TranscriptError};
use crate::turn::{send_turn, TurnError, TurnOutcome, TurnState, TurnStream};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("A reply is still being generated")]
    Busy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
}

/// User-editable settings that shape the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Base persona instruction, before the profile block is appended
    pub system_prompt: String,
    pub model: String,
    pub profile: ProfileContext,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_prompt: BASE_INSTRUCTION.to_string(),
            model: crate::llm::default_model().id.to_string(),
            profile: ProfileContext::default(),
        }
    }
}

impl Settings {
    /// Instruction actually handed to the session
    pub fn effective_instruction(&self) -> String {
        compose(&self.system_prompt, &self.profile)
    }

    fn merged(&self, update: SettingsUpdate) -> Self {
        Self {
            system_prompt: update.system_prompt.unwrap_or_else(|| self.system_prompt.clone()),
            model: update.model.unwrap_or_else(|| self.model.clone()),
            profile: update.profile.unwrap_or_else(|| self.profile.clone()),
        }
    }
}

/// Partial settings edit; absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub profile: Option<ProfileContext>,
}

/// Change notifications for observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageAppended { message: Message },
    MessageUpdated { message: Message },
    TranscriptReset { messages: Vec<Message> },
    TurnSettled { bot_message_id: MessageId, outcome: TurnOutcome },
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::MessageAppended { .. } => "message_appended",
            ChatEvent::MessageUpdated { .. } => "message_updated",
            ChatEvent::TranscriptReset { .. } => "transcript_reset",
            ChatEvent::TurnSettled { .. } => "turn_settled",
        }
    }
}

/// Ids of the two messages a send created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnIds {
    pub user_message_id: MessageId,
    pub bot_message_id: MessageId,
}

/// Clears the busy flag when dropped
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared chat state.
///
/// The async `sessions` mutex serializes every operation that replaces the
/// session or the settings. Transcript and settings locks are synchronous and
/// never held across an await, so a dropped turn can settle its message from
/// `Drop`.
pub struct ChatService {
    sessions: Mutex<SessionManager>,
    settings: RwLock<Settings>,
    transcript: RwLock<Transcript>,
    ids: IdGenerator,
    busy: Arc<AtomicBool>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatService {
    /// Create the service, open a session for `settings` and seed the greeting.
    ///
    /// A failed initial session is logged, not fatal: with `lazy_bootstrap`
    /// the first send creates a default session, otherwise that send settles
    /// with the fallback reply until settings are saved again.
    pub fn new(service: Arc<dyn GenerationService>, settings: Settings, lazy_bootstrap: bool) -> Self {
        let mut sessions = SessionManager::new(service, lazy_bootstrap);
        if let Err(e) = sessions.init(&settings.effective_instruction(), &settings.model) {
            tracing::warn!(model = %settings.model, error = %e, "Initial session could not be created");
        }

        let ids = IdGenerator::new();
        let mut transcript = Transcript::new();
        // A fresh transcript accepts any single finalized message
        let _ = transcript.append(greeting(&ids));

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sessions: Mutex::new(sessions),
            settings: RwLock::new(settings),
            transcript: RwLock::new(transcript),
            ids,
            busy: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.read_transcript().snapshot()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start a turn and run it on a background task
    pub async fn send(self: &Arc<Self>, text: &str) -> Result<TurnIds, ChatError> {
        let turn = self.begin_turn(text).await?;
        let ids = turn.ids();
        tokio::spawn(turn.run());
        Ok(ids)
    }

    /// Append the user message and an empty streaming bot message.
    ///
    /// Both messages are added together or not at all. The returned turn
    /// holds the busy flag; dropping it unfinished settles the bot message
    /// with the fallback reply. A session that cannot be obtained here is not
    /// an error to the caller; the turn settles with the fallback reply
    /// instead.
    pub async fn begin_turn(self: &Arc<Self>, text: &str) -> Result<PendingTurn, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let guard = BusyGuard::acquire(&self.busy).ok_or(ChatError::Busy)?;

        // Lazy: nothing is sent until the turn runs
        let stream = match send_turn(&mut *self.sessions.lock().await, text) {
            Ok(stream) => {
                tracing::debug!(session_generation = stream.session_generation(), "Turn bound to session");
                Ok(stream)
            }
            Err(TurnError::Session(e)) => Err(e),
            Err(TurnError::EmptyMessage) => return Err(ChatError::EmptyMessage),
        };

        let now = Utc::now();
        let user = Message::new(self.ids.next_id(now), Role::User, text, now);
        let bot = Message::bot_placeholder(self.ids.next_id(now), now);
        let ids = TurnIds {
            user_message_id: user.id.clone(),
            bot_message_id: bot.id.clone(),
        };

        self.write_transcript()
            .append_batch(vec![user.clone(), bot.clone()])?;
        self.emit(ChatEvent::MessageAppended { message: user });
        self.emit(ChatEvent::MessageAppended { message: bot });

        Ok(PendingTurn {
            service: Arc::clone(self),
            ids,
            stream: Some(stream),
            settled: false,
            _guard: guard,
        })
    }

    /// Start a new conversation with the current settings.
    ///
    /// On a session error nothing changes.
    pub async fn clear_chat(&self) -> Result<Vec<Message>, ChatError> {
        let mut sessions = self.sessions.lock().await;
        let settings = self.settings();
        sessions.init(&settings.effective_instruction(), &settings.model)?;

        let messages = {
            let mut transcript = self.write_transcript();
            transcript.replace_all(vec![greeting(&self.ids)])?;
            transcript.snapshot()
        };
        tracing::info!("Chat cleared");
        self.emit(ChatEvent::TranscriptReset {
            messages: messages.clone(),
        });
        Ok(messages)
    }

    /// Apply a settings edit and rebuild the session from it.
    ///
    /// The transcript is kept. A turn already streaming finishes on the
    /// session it started with. On error the settings are unchanged.
    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<Settings, ChatError> {
        let mut sessions = self.sessions.lock().await;
        let next = self.settings().merged(update);
        if find_model(&next.model).is_none() {
            return Err(SessionError::Config(LlmError::invalid_config(format!(
                "Unsupported model: {}",
                next.model
            )))
            .into());
        }

        sessions.reconfigure(&next.effective_instruction(), &next.model)?;
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clone_from(&next);
        tracing::info!(
            model = %next.model,
            has_profile = !next.profile.is_empty(),
            "Settings updated"
        );
        Ok(next)
    }

    /// Release the active session when the server stops.
    ///
    /// A turn still streaming keeps its own session handle and finishes.
    pub async fn shutdown(&self) {
        self.sessions.lock().await.reset();
        tracing::info!(busy = self.is_busy(), "Chat service shut down");
    }

    /// Update the streaming message `id`; silently skipped once it is
    /// finalized or gone after a clear
    fn update_streaming<F>(&self, id: &MessageId, update: F)
    where
        F: FnOnce(&mut Draft<'_>),
    {
        let updated = {
            let mut transcript = self.write_transcript();
            if transcript.mutate_last(id, update) {
                transcript.get(id).cloned()
            } else {
                None
            }
        };
        if let Some(message) = updated {
            self.emit(ChatEvent::MessageUpdated { message });
        }
    }

    /// Finalize the bot message of a turn; a failed turn shows the fallback
    /// reply in place of any partial text
    fn settle(&self, id: &MessageId, outcome: TurnOutcome) {
        match outcome {
            TurnOutcome::Complete => self.update_streaming(id, |draft| draft.finish()),
            TurnOutcome::Failed => self.update_streaming(id, |draft| {
                draft.set_text(FALLBACK_REPLY);
                draft.finish();
            }),
        }
        self.emit(ChatEvent::TurnSettled {
            bot_message_id: id.clone(),
            outcome,
        });
    }

    fn read_transcript(&self) -> RwLockReadGuard<'_, Transcript> {
        self.transcript.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_transcript(&self) -> RwLockWriteGuard<'_, Transcript> {
        self.transcript.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn greeting(ids: &IdGenerator) -> Message {
    let now = Utc::now();
    Message::new(ids.next_id(now), Role::Bot, GREETING, now)
}

/// A started turn whose reply has not been consumed yet.
///
/// Dropping it before [`run`](Self::run) finishes, for example when the
/// running task is aborted, settles the bot message as failed before the
/// busy flag is released.
pub struct PendingTurn {
    service: Arc<ChatService>,
    ids: TurnIds,
    stream: Option<Result<TurnStream, SessionError>>,
    settled: bool,
    // Dropped after `Drop::drop` has settled the message
    _guard: BusyGuard,
}

impl PendingTurn {
    pub fn ids(&self) -> TurnIds {
        self.ids.clone()
    }

    /// Consume the reply into the bot message and finalize it
    pub async fn run(mut self) -> TurnOutcome {
        let service = Arc::clone(&self.service);
        let id = self.ids.bot_message_id.clone();

        let outcome = match self.stream.take() {
            Some(Ok(mut stream)) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(fragment) => {
                            service.update_streaming(&id, |draft| draft.push_str(&fragment.text));
                        }
                        Err(e) => {
                            tracing::warn!(message_id = %id, error = %e, "Reply replaced with fallback");
                            break;
                        }
                    }
                }
                match stream.state() {
                    TurnState::Settled(outcome) => outcome,
                    TurnState::Idle | TurnState::Sending | TurnState::Streaming => TurnOutcome::Failed,
                }
            }
            Some(Err(e)) => {
                tracing::warn!(message_id = %id, error = %e, "No session for turn");
                TurnOutcome::Failed
            }
            None => TurnOutcome::Failed,
        };

        service.settle(&id, outcome);
        self.settled = true;
        outcome
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(message_id = %self.ids.bot_message_id, "Turn dropped before settling");
            self.service.settle(&self.ids.bot_message_id, TurnOutcome::Failed);
        }
    }
}
