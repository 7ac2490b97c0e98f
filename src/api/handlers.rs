//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ErrorResponse, MessagesResponse, ModelsResponse, PromptsResponse, SendMessageRequest,
};
use super::AppState;
use crate::chat::{ChatError, Settings, SettingsUpdate, TurnIds};
use crate::llm::{all_models, default_model, LlmErrorKind};
use crate::persona::QUICK_PROMPTS;
use crate::session::SessionError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Transcript and sending
        .route("/api/messages", get(get_messages).post(send_message))
        .route("/api/chat/clear", post(clear_chat))
        // Live updates
        .route("/api/events", get(stream_events))
        // Persona, model and profile
        .route("/api/settings", get(get_settings).put(update_settings))
        // Read-only catalogs
        .route("/api/models", get(list_models))
        .route("/api/prompts", get(list_prompts))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Transcript
// ============================================================

async fn get_messages(State(state): State<AppState>) -> Json<MessagesResponse> {
    Json(MessagesResponse {
        messages: state.chat.messages(),
        busy: state.chat.is_busy(),
    })
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<TurnIds>), AppError> {
    let ids = state.chat.send(&req.text).await?;
    tracing::info!(bot_message_id = %ids.bot_message_id, "Turn started");
    Ok((StatusCode::ACCEPTED, Json(ids)))
}

async fn clear_chat(State(state): State<AppState>) -> Result<Json<MessagesResponse>, AppError> {
    let messages = state.chat.clear_chat().await?;
    Ok(Json(MessagesResponse {
        messages,
        busy: state.chat.is_busy(),
    }))
}

async fn stream_events(State(state): State<AppState>) -> impl IntoResponse {
    // Subscribe before the snapshot so no change falls between the two
    let events = state.chat.subscribe();
    let messages = state.chat.messages();
    sse_stream(&messages, state.chat.is_busy(), events)
}

// ============================================================
// Settings
// ============================================================

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.chat.settings())
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<Settings>, AppError> {
    Ok(Json(state.chat.update_settings(update).await?))
}

// ============================================================
// Catalogs
// ============================================================

async fn list_models() -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: all_models(),
        default: default_model().id.to_string(),
    })
}

async fn list_prompts() -> Json<PromptsResponse> {
    Json(PromptsResponse {
        prompts: QUICK_PROMPTS,
    })
}

async fn get_version() -> &'static str {
    concat!("douzhidao ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        let message = e.to_string();
        match e {
            ChatError::EmptyMessage => AppError::BadRequest(message),
            ChatError::Busy => AppError::Conflict(message),
            ChatError::Session(SessionError::Config(ref llm)) => match llm.kind {
                LlmErrorKind::InvalidConfig | LlmErrorKind::InvalidRequest => {
                    AppError::BadRequest(message)
                }
                _ => AppError::BadGateway(message),
            },
            ChatError::Session(SessionError::NotInitialized) | ChatError::Transcript(_) => {
                AppError::Internal(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        }

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
