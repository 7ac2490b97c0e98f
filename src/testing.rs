//! Mock generation service for testing
//!
//! Replies are scripted up front and consumed in order by whichever session
//! receives the next turn.

use crate::llm::{
    ChatSession, Fragment, FragmentStream, GenerationConfig, GenerationService, LlmError,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One scripted reply
pub enum MockReply {
    /// Stream these fragments, then end normally
    Fragments(Vec<String>),
    /// Stream these fragments, then fail
    FailAfter(Vec<String>, LlmError),
    /// Fail before any fragment is produced
    Reject(LlmError),
    /// Fragments are pushed by the test through the paired sender
    Channel(mpsc::UnboundedReceiver<Result<Fragment, LlmError>>),
}

impl MockReply {
    pub fn fragments(parts: &[&str]) -> Self {
        MockReply::Fragments(parts.iter().map(ToString::to_string).collect())
    }

    pub fn fail_after(parts: &[&str], error: LlmError) -> Self {
        MockReply::FailAfter(parts.iter().map(ToString::to_string).collect(), error)
    }

    /// A reply the test drives fragment by fragment
    pub fn channel() -> (mpsc::UnboundedSender<Result<Fragment, LlmError>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, MockReply::Channel(rx))
    }
}

/// A message a mock session received
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// 1-based creation index of the session that received it
    pub session_index: usize,
    pub model: String,
    pub text: String,
}

#[derive(Default)]
struct Shared {
    replies: Mutex<VecDeque<MockReply>>,
    sent: Mutex<Vec<SentMessage>>,
}

/// Mock service recording every session it creates
#[derive(Default)]
pub struct MockGenerationService {
    shared: Arc<Shared>,
    created: Mutex<Vec<GenerationConfig>>,
    create_failures: Mutex<VecDeque<LlmError>>,
}

impl MockGenerationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the reply for the next turn
    pub fn queue_reply(&self, reply: MockReply) {
        self.shared.replies.lock().unwrap().push_back(reply);
    }

    /// Make the next `create_session` call fail
    pub fn fail_next_create(&self, error: LlmError) {
        self.create_failures.lock().unwrap().push_back(error);
    }

    /// Configs of all successfully created sessions, oldest first
    pub fn created_configs(&self) -> Vec<GenerationConfig> {
        self.created.lock().unwrap().clone()
    }

    /// Messages received across all sessions, oldest first
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.shared.sent.lock().unwrap().clone()
    }
}

impl GenerationService for MockGenerationService {
    fn create_session(&self, config: &GenerationConfig) -> Result<Arc<dyn ChatSession>, LlmError> {
        if let Some(error) = self.create_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut created = self.created.lock().unwrap();
        created.push(config.clone());
        Ok(Arc::new(MockChatSession {
            index: created.len(),
            config: config.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockChatSession {
    index: usize,
    config: GenerationConfig,
    shared: Arc<Shared>,
}

#[async_trait]
impl ChatSession for MockChatSession {
    async fn send_streaming(&self, message: &str) -> Result<FragmentStream, LlmError> {
        self.shared.sent.lock().unwrap().push(SentMessage {
            session_index: self.index,
            model: self.config.model.clone(),
            text: message.to_string(),
        });

        let reply = self
            .shared
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::network("No mock reply queued"))?;

        match reply {
            MockReply::Fragments(parts) => {
                let items: Vec<Result<Fragment, LlmError>> =
                    parts.into_iter().map(|p| Ok(Fragment::new(p))).collect();
                Ok(futures::stream::iter(items).boxed())
            }
            MockReply::FailAfter(parts, error) => {
                let items: Vec<Result<Fragment, LlmError>> = parts
                    .into_iter()
                    .map(|p| Ok(Fragment::new(p)))
                    .chain(std::iter::once(Err(error)))
                    .collect();
                Ok(futures::stream::iter(items).boxed())
            }
            MockReply::Reject(error) => Err(error),
            MockReply::Channel(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
        }
    }

    fn config(&self) -> &GenerationConfig {
        &self.config
    }
}
