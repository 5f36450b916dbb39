use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message};
use crate::state::AppState;
use crate::store::DEFAULT_CONVERSATION_TITLE;

#[derive(Deserialize, Default)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Serialize)]
pub struct DeleteConversationResponse {
    pub success: bool,
    pub conversation_id: Uuid,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Json<Vec<Conversation>> {
    Json(state.history.user_conversations(user.id).await)
}

pub async fn create_conversation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Option<Json<CreateConversationRequest>>,
) -> AppResult<(StatusCode, Json<Conversation>)> {
    let title = payload
        .and_then(|Json(body)| body.title)
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string());

    let conversation = state
        .history
        .start_conversation(user.id, user.email.as_deref(), &title)
        .await
        .ok_or_else(|| AppError::internal("failed to create conversation"))?;

    Ok((StatusCode::OK, Json(conversation)))
}

/// Conversations owned by someone else are reported as missing.
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<Message>>> {
    state
        .history
        .owned_conversation(user.id, conversation_id)
        .await
        .ok_or_else(AppError::not_found)?;
    Ok(Json(state.history.conversation_messages(conversation_id).await))
}

// Nothing is removed yet; the endpoint only acknowledges the request.
pub async fn delete_conversation(
    _user: AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
) -> Json<DeleteConversationResponse> {
    Json(DeleteConversationResponse {
        success: true,
        conversation_id,
    })
}
