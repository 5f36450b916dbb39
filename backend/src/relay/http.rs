use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_stream::stream;
use futures_util::StreamExt;
use reqwest::Client;

use super::anthropic::{open_stream, AnthropicSettings, Delta, StreamEvent};
use super::{guarded, CompletionRelay, FragmentStream, RawFragments};

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Relay that reads the raw server-push byte stream and decodes it line by
/// line. `timeout` bounds connecting and each wait for the next chunk, never
/// the whole answer.
#[derive(Clone)]
pub struct HttpRelay {
    client: Client,
    settings: Arc<AnthropicSettings>,
}

impl HttpRelay {
    pub fn new(settings: AnthropicSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .context("failed to build model API client")?;
        Ok(Self {
            client,
            settings: Arc::new(settings),
        })
    }

    async fn open(self, prompt: String) -> Result<RawFragments> {
        let response = open_stream(&self.client, &self.settings, &prompt).await?;
        let mut body = Box::pin(response.bytes_stream());

        Ok(Box::pin(stream! {
            let mut lines = LineBuffer::default();
            let mut finished = false;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(anyhow!("response stream interrupted: {err}"));
                        break;
                    }
                };

                for line in lines.push(&chunk) {
                    match interpret_line(&line) {
                        Line::Fragment(text) => yield Ok(text),
                        Line::Skip => {}
                        Line::Done => {
                            finished = true;
                            break;
                        }
                        Line::Failed(message) => {
                            yield Err(anyhow!(message));
                            finished = true;
                            break;
                        }
                    }
                }
                if finished {
                    break;
                }
            }

            if !finished {
                if let Some(Line::Fragment(text)) = lines.finish().as_deref().map(interpret_line) {
                    yield Ok(text);
                }
            }
        }))
    }
}

impl CompletionRelay for HttpRelay {
    fn stream(&self, prompt: &str, files: &[String]) -> FragmentStream {
        if !files.is_empty() {
            tracing::debug!(count = files.len(), "attachments are not forwarded by the http relay");
        }
        let relay = self.clone();
        guarded("http", relay.open(prompt.to_string()))
    }
}

/// Splits arbitrary byte chunks into complete lines.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[derive(Debug, PartialEq)]
enum Line {
    Fragment(String),
    Skip,
    Done,
    Failed(String),
}

fn interpret_line(line: &str) -> Line {
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return Line::Skip;
    };
    let data = data.trim_start();
    if data == DONE_SENTINEL {
        return Line::Done;
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(StreamEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        }) => Line::Fragment(text),
        Ok(StreamEvent::MessageStop) => Line::Done,
        Ok(StreamEvent::Error { error }) => Line::Failed(format!("model API error: {}", error.message)),
        Ok(_) => Line::Skip,
        Err(err) => Line::Failed(format!("malformed stream event: {err}")),
    }
}
