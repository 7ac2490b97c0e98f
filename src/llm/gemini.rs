//! Google Gemini provider implementation
//!
//! Sessions are client-side: each [`GeminiChat`] keeps the completed turns and
//! resends them with every request to `streamGenerateContent`.

use super::models::find_model;
use super::sse::SseParser;
use super::types::{Fragment, FragmentStream, GenerationConfig, HistoryEntry, TurnRole};
use super::{ChatSession, GenerationService, LlmError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Public Gemini API endpoint
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Gemini service implementation
pub struct GeminiService {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiService {
    pub fn new(api_key: Option<String>, base_url: Option<&str>) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        )
    }
}

impl GenerationService for GeminiService {
    fn create_session(&self, config: &GenerationConfig) -> Result<Arc<dyn ChatSession>, LlmError> {
        if find_model(&config.model).is_none() {
            return Err(LlmError::invalid_config(format!(
                "Unsupported model: {:?}",
                config.model
            )));
        }
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| LlmError::invalid_config("GEMINI_API_KEY is not set"))?;

        Ok(Arc::new(GeminiChat {
            client: self.client.clone(),
            api_key,
            url: self.stream_url(&config.model),
            config: config.clone(),
            history: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

/// One Gemini conversation
pub struct GeminiChat {
    client: Client,
    api_key: String,
    url: String,
    config: GenerationConfig,
    history: Arc<Mutex<Vec<HistoryEntry>>>,
}

impl GeminiChat {
    /// Completed turns, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn translate_request(&self, message: &str) -> GeminiRequest {
        let history = self.history();
        let mut contents: Vec<GeminiContent> = history
            .iter()
            .map(|entry| GeminiContent::text(Some(entry.role), &entry.text))
            .collect();
        contents.push(GeminiContent::text(Some(TurnRole::User), message));

        let system_instruction = if self.config.system_instruction.trim().is_empty() {
            None
        } else {
            Some(GeminiContent::text(None, &self.config.system_instruction))
        };

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                temperature: self.config.temperature,
                top_k: self.config.top_k,
                thinking_config: GeminiThinkingConfig {
                    thinking_budget: self.config.thinking_budget,
                },
            },
        }
    }
}

#[async_trait]
impl ChatSession for GeminiChat {
    async fn send_streaming(&self, message: &str) -> Result<FragmentStream, LlmError> {
        let request = self.translate_request(message);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
            return Err(error_from_body(status.as_u16(), &body));
        }

        let history = Arc::clone(&self.history);
        let user_text = message.to_string();
        let record = move |reply: String| {
            let mut history = history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push(HistoryEntry {
                role: TurnRole::User,
                text: user_text,
            });
            history.push(HistoryEntry {
                role: TurnRole::Model,
                text: reply,
            });
        };

        Ok(decode_stream(response.bytes_stream(), record))
    }

    fn config(&self) -> &GenerationConfig {
        &self.config
    }
}

fn error_from_body(status: u16, body: &str) -> LlmError {
    match serde_json::from_str::<GeminiErrorResponse>(body) {
        Ok(error_resp) => LlmError::from_status(status, error_resp.error.message),
        Err(_) => LlmError::from_status(status, body.to_string()),
    }
}

/// Turn a raw SSE byte stream into fragments.
///
/// `on_complete` receives the full reply text once the byte stream ends
/// without error; it is never called for a failed reply.
fn decode_stream<S, B, E, F>(bytes: S, on_complete: F) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce(String) + Send + 'static,
{
    let state = DecodeState {
        bytes: bytes.boxed(),
        parser: SseParser::default(),
        pending: VecDeque::new(),
        reply: String::new(),
        done: false,
        on_complete: Some(Box::new(on_complete)),
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for payload in state.parser.feed(chunk.as_ref()) {
                        state.push_payload(&payload);
                    }
                }
                Some(Err(e)) => state.fail(LlmError::network(format!("Stream interrupted: {e}"))),
                None => {
                    if let Some(payload) = state.parser.finish() {
                        state.push_payload(&payload);
                    }
                    state.complete();
                }
            }
        }
    })
    .boxed()
}

struct DecodeState<B, E> {
    bytes: futures::stream::BoxStream<'static, Result<B, E>>,
    parser: SseParser,
    pending: VecDeque<Result<Fragment, LlmError>>,
    reply: String,
    done: bool,
    on_complete: Option<Box<dyn FnOnce(String) + Send>>,
}

impl<B, E> DecodeState<B, E> {
    fn push_payload(&mut self, payload: &str) {
        if self.done {
            return;
        }
        let chunk: GeminiStreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.fail(LlmError::unknown(format!("Malformed stream frame: {e}")));
                return;
            }
        };
        if let Some(error) = chunk.error {
            let status = error.code.and_then(|c| u16::try_from(c).ok()).unwrap_or(500);
            self.fail(LlmError::from_status(status, error.message));
            return;
        }

        let text = chunk.text();
        if !text.is_empty() {
            self.reply.push_str(&text);
            self.pending.push_back(Ok(Fragment::new(text)));
        }
    }

    fn fail(&mut self, error: LlmError) {
        self.pending.push_back(Err(error));
        self.done = true;
        self.on_complete = None;
    }

    fn complete(&mut self) {
        self.done = true;
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(std::mem::take(&mut self.reply));
        }
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn text(role: Option<TurnRole>, text: &str) -> Self {
        Self {
            role: role.map(|r| r.as_str().to_string()),
            parts: vec![GeminiPart {
                text: Some(text.to_string()),
                thought: None,
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    top_k: u32,
    thinking_config: GeminiThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<GeminiError>,
}

impl GeminiStreamChunk {
    /// Visible text of the first candidate; thought summaries are dropped
    fn text(&self) -> String {
        let Some(content) = self
            .candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
        else {
            return String::new();
        };
        content
            .parts
            .iter()
            .filter(|part| part.thought != Some(true))
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    code: Option<i64>,
    #[allow(dead_code)]
    status: Option<String>,
}
