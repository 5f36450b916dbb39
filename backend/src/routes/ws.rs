//! Chat over a WebSocket.
//!
//! The socket handshake only carries the access token (`?token=`). Every text
//! frame the client sends afterwards is JSON; frames typed `"message"` start
//! one relay exchange, anything else is ignored:
//!
//! ```text
//! -> {"type":"message","conversation_id":null,"content":"hello","files":[]}
//! <- {"type":"conversation_created","conversation_id":"..."}
//! <- {"type":"stream","content":"Hel"}
//! <- {"type":"stream","content":"lo!"}
//! <- {"type":"done","message_id":"...","content":"Hello!"}
//! ```
//!
//! The session loop is written against a plain `Stream`/`Sink` pair so it can
//! run without a real socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::auth::{authenticate, AuthenticatedUser};
use crate::models::MessageRole;
use crate::state::AppState;
use crate::store::CHAT_CONVERSATION_TITLE;

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConversationCreated {
        conversation_id: Uuid,
    },
    Stream {
        content: String,
    },
    Done {
        message_id: Option<Uuid>,
        content: String,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// What the session loop sees of the client side of the socket.
#[derive(Debug)]
pub enum SocketEvent {
    Text(String),
    Closed,
}

enum Halt {
    Disconnected,
    Failed(String),
}

pub async fn chat_socket(
    ws: WebSocketUpgrade,
    Query(params): Query<SocketParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state, params.token))
}

async fn serve_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let (sender, receiver) = socket.split();
    let outbound = sender.with(encode_frame);
    let inbound = receiver.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Text(text)) => Some(SocketEvent::Text(text)),
            Ok(Message::Close(_)) => Some(SocketEvent::Closed),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(error = %err, "websocket receive failed");
                Some(SocketEvent::Closed)
            }
        })
    });

    serve_session(&state, token, inbound, outbound).await;
}

fn encode_frame(frame: ServerFrame) -> future::Ready<Result<Message, axum::Error>> {
    future::ready(
        serde_json::to_string(&frame)
            .map(Message::Text)
            .map_err(axum::Error::new),
    )
}

/// Authenticates the token, then serves chat messages until the client goes
/// away or an exchange fails. The outbound side is always closed on return.
pub async fn serve_session<I, O>(state: &AppState, token: Option<String>, inbound: I, mut outbound: O)
where
    I: Stream<Item = SocketEvent> + Unpin,
    O: Sink<ServerFrame> + Unpin,
{
    let token = token.filter(|token| !token.is_empty());
    let user = match token {
        None => {
            let _ = outbound.send(ServerFrame::error("No token provided")).await;
            let _ = outbound.close().await;
            return;
        }
        Some(token) => match authenticate(state, &token).await {
            Ok(user) => user,
            Err(_) => {
                let _ = outbound.send(ServerFrame::error("Invalid or expired token")).await;
                let _ = outbound.close().await;
                return;
            }
        },
    };

    tracing::info!(user_id = %user.id, "chat socket connected");
    run_session(state, &user, inbound, &mut outbound).await;
    tracing::info!(user_id = %user.id, "chat socket closed");
    let _ = outbound.close().await;
}

async fn run_session<I, O>(
    state: &AppState,
    user: &AuthenticatedUser,
    mut inbound: I,
    outbound: &mut O,
) where
    I: Stream<Item = SocketEvent> + Unpin,
    O: Sink<ServerFrame> + Unpin,
{
    let user_id = user.id;
    while let Some(event) = inbound.next().await {
        let text = match event {
            SocketEvent::Text(text) => text,
            SocketEvent::Closed => break,
        };

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%user_id, error = %err, "undecodable chat frame");
                let _ = outbound
                    .send(ServerFrame::error(format!("invalid message: {err}")))
                    .await;
                break;
            }
        };

        if frame.kind != "message" {
            continue;
        }

        match exchange(state, user, frame, outbound).await {
            Ok(()) => {}
            Err(Halt::Disconnected) => break,
            Err(Halt::Failed(message)) => {
                tracing::warn!(%user_id, %message, "chat exchange failed");
                let _ = outbound.send(ServerFrame::error(message)).await;
                break;
            }
        }
    }
}

async fn exchange<O>(
    state: &AppState,
    user: &AuthenticatedUser,
    frame: ClientFrame,
    outbound: &mut O,
) -> Result<(), Halt>
where
    O: Sink<ServerFrame> + Unpin,
{
    let conversation_id = match frame.conversation_id {
        Some(id) => id,
        None => {
            let conversation = state
                .history
                .start_conversation(user.id, user.email.as_deref(), CHAT_CONVERSATION_TITLE)
                .await
                .ok_or_else(|| Halt::Failed("failed to create conversation".to_string()))?;
            emit(
                outbound,
                ServerFrame::ConversationCreated {
                    conversation_id: conversation.id,
                },
            )
            .await?;
            conversation.id
        }
    };

    state
        .history
        .save_message(conversation_id, MessageRole::User, &frame.content)
        .await;

    let mut answer = String::new();
    let mut fragments = state.relay.stream(&frame.content, &frame.files);
    while let Some(fragment) = fragments.next().await {
        answer.push_str(&fragment);
        emit(outbound, ServerFrame::Stream { content: fragment }).await?;
    }

    let message = state
        .history
        .save_message(conversation_id, MessageRole::Assistant, &answer)
        .await;

    emit(
        outbound,
        ServerFrame::Done {
            message_id: message.map(|message| message.id),
            content: answer,
        },
    )
    .await
}

async fn emit<O>(outbound: &mut O, frame: ServerFrame) -> Result<(), Halt>
where
    O: Sink<ServerFrame> + Unpin,
{
    outbound.send(frame).await.map_err(|_| Halt::Disconnected)
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}
