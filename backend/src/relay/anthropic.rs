use anyhow::{bail, Context, Result};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug)]
pub struct AnthropicSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [UserTurn<'a>; 1],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: &'a str,
}

/// Opens a streaming Messages API exchange for a single user turn.
pub(crate) async fn open_stream(
    client: &Client,
    settings: &AnthropicSettings,
    prompt: &str,
) -> Result<Response> {
    let body = MessagesRequest {
        model: &settings.model,
        max_tokens: settings.max_tokens,
        messages: [UserTurn {
            role: "user",
            content: prompt,
        }],
        stream: true,
    };

    let response = client
        .post(format!("{}/v1/messages", settings.base_url))
        .header("x-api-key", &settings.api_key)
        .header("anthropic-version", API_VERSION)
        .header("accept", "text/event-stream")
        .json(&body)
        .send()
        .await
        .context("failed to reach model API")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("model API returned {status}: {body}");
    }

    Ok(response)
}

/// Data payload of a streamed event, keyed by its `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub message: String,
}
