use super::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chatsync_messaging::{Conversation, ConversationId, Message, TypingIndicator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAccepted {
    pub intent_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub typing: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusRequest {
    pub conversation_id: Option<ConversationId>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/:id/messages", get(list_messages))
        .route("/conversations/:id/typing", get(typing).post(set_typing))
        .route("/conversations/:id/read", post(mark_read))
        .route("/focus", post(focus))
}

async fn list_conversations(State(state): State<Arc<AppState>>) -> Json<Vec<Conversation>> {
    Json(state.client().get_conversations())
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<MessagesResponse> {
    let id = ConversationId::new(id);
    Json(MessagesResponse {
        messages: state.client().get_messages(&id),
        has_more: state.client().store().has_more_messages(&id),
    })
}

async fn typing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Vec<TypingIndicator>> {
    Json(state.client().get_typing_indicators(&ConversationId::new(id)))
}

async fn set_typing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<TypingRequest>,
) -> Json<IntentAccepted> {
    let id = ConversationId::new(id);
    let intent_id = if request.typing {
        state.client().send_typing_start(&id).await
    } else {
        state.client().send_typing_stop(&id).await
    };
    Json(IntentAccepted { intent_id })
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<IntentAccepted> {
    let intent_id = state.client().mark_read(&ConversationId::new(id)).await;
    Json(IntentAccepted { intent_id })
}

async fn focus(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FocusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.client().focus(request.conversation_id).await?;
    let focused = state.client().store().focused();
    Ok(Json(serde_json::json!({ "focused": focused })))
}
