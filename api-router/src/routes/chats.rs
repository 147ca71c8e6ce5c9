use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::types::{
        chat::Chat,
        message::{DocumentReference, Message, MessageRole},
    },
};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

const DEFAULT_CHAT_TITLE: &str = "New chat";

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Chat> for ChatResponse {
    fn from(chat: Chat) -> Self {
        Self {
            id: chat.id,
            workspace_id: chat.workspace_id,
            title: chat.title,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub message_index: u32,
    pub role: MessageRole,
    pub content: String,
    pub document_refs: Vec<DocumentReference>,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            chat_id: message.chat_id,
            message_index: message.message_index,
            role: message.role,
            content: message.content,
            document_refs: message.document_refs,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateChatParams {
    pub title: Option<String>,
}

pub async fn create_chat(
    State(state): State<ApiState>,
    Path(workspace_id): Path<String>,
    Json(params): Json<CreateChatParams>,
) -> Result<impl IntoResponse, ApiError> {
    let title = params
        .title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());

    let chat = Chat::new(workspace_id, title);
    state
        .db
        .store_item(chat.clone())
        .await
        .map_err(AppError::from)?;

    Ok((StatusCode::CREATED, Json(ChatResponse::from(chat))))
}

pub async fn list_chats(
    State(state): State<ApiState>,
    Path(workspace_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let chats = Chat::list_by_workspace(&workspace_id, &state.db).await?;
    Ok(Json(
        chats.into_iter().map(ChatResponse::from).collect::<Vec<_>>(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageParams {
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatTurnResponse {
    user_message: MessageResponse,
    assistant_message: MessageResponse,
}

pub async fn send_message(
    State(state): State<ApiState>,
    Path((workspace_id, chat_id)): Path<(String, String)>,
    Json(params): Json<SendMessageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let turn = state
        .engine
        .respond(&workspace_id, &chat_id, &params.content)
        .await?;

    Ok(Json(ChatTurnResponse {
        user_message: turn.user_message.into(),
        assistant_message: turn.assistant_message.into(),
    }))
}

pub async fn list_messages(
    State(state): State<ApiState>,
    Path((workspace_id, chat_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.engine.chat_history(&workspace_id, &chat_id).await?;
    Ok(Json(
        messages
            .into_iter()
            .map(MessageResponse::from)
            .collect::<Vec<_>>(),
    ))
}

pub async fn message_sources(
    State(state): State<ApiState>,
    Path((workspace_id, chat_id, message_id)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let sources = state
        .engine
        .message_sources(&workspace_id, &chat_id, &message_id)
        .await?;
    Ok(Json(sources))
}
