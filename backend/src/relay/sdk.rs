use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_stream::stream;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use super::anthropic::{open_stream, AnthropicSettings, ApiError, Delta};
use super::{guarded, CompletionRelay, FragmentStream, RawFragments};

/// Relay that consumes the model's managed event-stream session, dispatching
/// on each event's name.
#[derive(Clone)]
pub struct SdkRelay {
    client: Client,
    settings: Arc<AnthropicSettings>,
}

impl SdkRelay {
    pub fn new(settings: AnthropicSettings) -> Self {
        Self {
            client: Client::new(),
            settings: Arc::new(settings),
        }
    }

    async fn open(self, prompt: String) -> Result<RawFragments> {
        let response = open_stream(&self.client, &self.settings, &prompt).await?;
        let mut events = Box::pin(response.bytes_stream().eventsource());

        Ok(Box::pin(stream! {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        yield Err(anyhow!("event stream interrupted: {err}"));
                        break;
                    }
                };

                match event.event.as_str() {
                    "content_block_delta" => match serde_json::from_str::<DeltaEvent>(&event.data) {
                        Ok(DeltaEvent { delta: Delta::TextDelta { text } }) => yield Ok(text),
                        Ok(_) => {}
                        Err(err) => {
                            yield Err(anyhow!("malformed content_block_delta: {err}"));
                            break;
                        }
                    },
                    "message_stop" => break,
                    "error" => {
                        let message = serde_json::from_str::<ErrorEvent>(&event.data)
                            .map(|payload| payload.error.message)
                            .unwrap_or(event.data);
                        yield Err(anyhow!("model API error: {message}"));
                        break;
                    }
                    _ => {}
                }
            }
        }))
    }
}

impl CompletionRelay for SdkRelay {
    fn stream(&self, prompt: &str, files: &[String]) -> FragmentStream {
        if !files.is_empty() {
            tracing::debug!(count = files.len(), "attachments are not forwarded by the sdk relay");
        }
        let relay = self.clone();
        guarded("sdk", relay.open(prompt.to_string()))
    }
}

#[derive(Deserialize)]
struct DeltaEvent {
    delta: Delta,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ApiError,
}
