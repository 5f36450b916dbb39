use std::convert::Infallible;

use async_stream::stream;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, MaybeUser};
use crate::error::{AppError, AppResult};
use crate::models::MessageRole;
use crate::state::AppState;
use crate::store::CHAT_CONVERSATION_TITLE;

pub const CONVERSATION_ID_HEADER: HeaderName = HeaderName::from_static("x-conversation-id");

const CONVERSATION_UNAVAILABLE: &str =
    "⚠️ Could not create a conversation. Please try again shortly.";

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Serialize)]
pub struct SendMessageResponse {
    pub message_id: Option<Uuid>,
    pub conversation_id: Uuid,
    pub content: String,
}

#[derive(Deserialize)]
pub struct StreamChatRequest {
    pub user_id: Option<Uuid>,
    pub message: String,
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Runs the whole exchange before answering.
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SendMessageRequest>,
) -> AppResult<Json<SendMessageResponse>> {
    if payload.content.trim().is_empty() {
        return Err(AppError::bad_request("content must not be empty"));
    }

    let conversation_id = match payload.conversation_id {
        Some(id) => id,
        None => state
            .history
            .start_conversation(user.id, user.email.as_deref(), CHAT_CONVERSATION_TITLE)
            .await
            .map(|conversation| conversation.id)
            .ok_or_else(|| AppError::internal("failed to create conversation"))?,
    };

    state
        .history
        .save_message(conversation_id, MessageRole::User, &payload.content)
        .await;

    let content = state
        .relay
        .stream(&payload.content, &payload.files)
        .collect::<Vec<String>>()
        .await
        .concat();

    let message = state
        .history
        .save_message(conversation_id, MessageRole::Assistant, &content)
        .await;

    Ok(Json(SendMessageResponse {
        message_id: message.map(|message| message.id),
        conversation_id,
        content,
    }))
}

/// Streams fragments to the caller as a plain-text body while they arrive.
///
/// A bearer token is optional here: without one the body's `user_id` is
/// taken as given.
pub async fn stream_chat(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Json(payload): Json<StreamChatRequest>,
) -> AppResult<Response> {
    let (user_id, email) = match (user, payload.user_id) {
        (Some(user), _) => (user.id, user.email),
        (None, Some(user_id)) => (user_id, None),
        (None, None) => return Err(AppError::unauthorized()),
    };

    if payload.message.trim().is_empty() {
        return Err(AppError::bad_request("message must not be empty"));
    }

    let conversation_id = match payload.conversation_id {
        Some(id) => id,
        None => match state
            .history
            .start_conversation(user_id, email.as_deref(), CHAT_CONVERSATION_TITLE)
            .await
        {
            Some(conversation) => conversation.id,
            None => return Ok(plain_text(CONVERSATION_UNAVAILABLE)),
        },
    };

    tracing::debug!(%user_id, %conversation_id, "streaming chat reply");

    let body = stream! {
        state
            .history
            .save_message(conversation_id, MessageRole::User, &payload.message)
            .await;

        let mut answer = String::new();
        let mut fragments = state.relay.stream(&payload.message, &payload.files);
        while let Some(fragment) = fragments.next().await {
            answer.push_str(&fragment);
            yield Ok::<_, Infallible>(fragment);
        }

        state
            .history
            .save_message(conversation_id, MessageRole::Assistant, &answer)
            .await;
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(CONVERSATION_ID_HEADER, conversation_id.to_string())
        .body(Body::from_stream(body))
        .map_err(|err| AppError::internal(format!("failed to build response: {err}")))
}

fn plain_text(text: &'static str) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response()
}
