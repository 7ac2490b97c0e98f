//! Ordered message transcript
//!
//! Messages are kept in creation order. The only in-place mutation allowed is
//! on a bot message still marked `streaming`; once finalized a message never
//! changes again. A full reset is the only way entries disappear.

#[cfg(test)]
mod proptests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(rename = "model")]
    Bot,
    System,
}

/// Opaque message identifier, unique for the life of the process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates `"{unix_millis}-{seq}"` ids.
///
/// `seq` increases monotonically across the generator's life, so two ids
/// minted in the same millisecond still differ.
#[derive(Debug, Default)]
pub struct IdGenerator {
    seq: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, now: DateTime<Utc>) -> MessageId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        MessageId(format!("{}-{seq}", now.timestamp_millis()))
    }
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub streaming: bool,
}

impl Message {
    /// A finalized message
    pub fn new(id: MessageId, role: Role, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            role,
            text: text.into(),
            timestamp,
            streaming: false,
        }
    }

    /// An empty bot message awaiting fragments
    pub fn bot_placeholder(id: MessageId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            role: Role::Bot,
            text: String::new(),
            timestamp,
            streaming: true,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("Message id {0} already exists")]
    DuplicateId(MessageId),
    #[error("Message {0} is still streaming")]
    AlreadyStreaming(MessageId),
    #[error("Only bot messages may stream")]
    NonBotStreaming,
}

/// Mutable view of a streaming message handed to `mutate_last` updaters.
///
/// Only the text and the streaming flag are reachable; id, role, and
/// timestamp stay immutable.
pub struct Draft<'a> {
    text: &'a mut String,
    streaming: &'a mut bool,
}

impl Draft<'_> {
    pub fn text(&self) -> &str {
        self.text
    }

    /// Append a fragment
    pub fn push_str(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    /// Replace the text wholesale (used for the failure apology)
    pub fn set_text(&mut self, text: impl Into<String>) {
        *self.text = text.into();
    }

    /// Clear the streaming flag; the message is immutable afterwards
    pub fn finish(&mut self) {
        *self.streaming = false;
    }
}

/// Ordered message log
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to the end.
    ///
    /// Rejects a duplicate id, a second concurrently streaming message, and a
    /// streaming message that is not from the bot.
    pub fn append(&mut self, message: Message) -> Result<(), TranscriptError> {
        if self.messages.iter().any(|m| m.id == message.id) {
            return Err(TranscriptError::DuplicateId(message.id));
        }
        if message.streaming {
            if message.role != Role::Bot {
                return Err(TranscriptError::NonBotStreaming);
            }
            if let Some(active) = self.streaming_message() {
                return Err(TranscriptError::AlreadyStreaming(active.id.clone()));
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Append several messages as one unit.
    ///
    /// Each is validated like [`append`](Self::append); if any is rejected
    /// none of them are kept.
    pub fn append_batch(&mut self, messages: Vec<Message>) -> Result<(), TranscriptError> {
        let start = self.messages.len();
        for message in messages {
            if let Err(e) = self.append(message) {
                self.messages.truncate(start);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Apply `update` to the message with `id` if it is still streaming.
    ///
    /// Returns whether the updater ran. A finalized or unknown id is a no-op.
    pub fn mutate_last<F>(&mut self, id: &MessageId, update: F) -> bool
    where
        F: FnOnce(&mut Draft<'_>),
    {
        let Some(message) = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| &m.id == id && m.streaming)
        else {
            return false;
        };

        let mut draft = Draft {
            text: &mut message.text,
            streaming: &mut message.streaming,
        };
        update(&mut draft);
        true
    }

    /// Discard everything and start over with `messages`.
    ///
    /// The replacement is validated like a sequence of appends; on error the
    /// current transcript is left untouched.
    pub fn replace_all(&mut self, messages: Vec<Message>) -> Result<(), TranscriptError> {
        let mut next = Transcript::new();
        for message in messages {
            next.append(message)?;
        }
        *self = next;
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Cloned snapshot for observers
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// The message currently receiving fragments, if any
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.streaming)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
