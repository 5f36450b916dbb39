//! Completion relay: forwards a prompt to a text-generation backend and
//! surfaces its answer as a stream of text fragments.
//!
//! Three backends implement [`CompletionRelay`]; exactly one is active and is
//! chosen by `RELAY_BACKEND`. Whatever goes wrong inside a backend, the
//! fragment stream itself never fails: the error is rendered as one last
//! fragment carrying [`ERROR_MARKER`].

mod anthropic;
pub mod cli;
pub mod http;
pub mod sdk;
#[cfg(test)]
mod stub_server;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_stream::stream;
use futures_util::{Stream, StreamExt};

use crate::config::{AppConfig, RelayBackend};

pub use anthropic::AnthropicSettings;
pub use cli::CliRelay;
pub use http::HttpRelay;
pub use sdk::SdkRelay;

pub const ERROR_MARKER: &str = "⚠️ Error:";

/// Model output, one fragment at a time. Infallible by construction.
pub type FragmentStream = Pin<Box<dyn Stream<Item = String> + Send>>;

pub(crate) type RawFragments = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub trait CompletionRelay: Send + Sync + 'static {
    /// `files` are storage paths of attachments for this prompt.
    fn stream(&self, prompt: &str, files: &[String]) -> FragmentStream;
}

pub fn error_fragment(err: &anyhow::Error) -> String {
    format!("\n{ERROR_MARKER} {err:#}")
}

/// Drives a backend exchange, turning the first failure into a final error
/// fragment and ending the stream there.
pub(crate) fn guarded<F>(backend: &'static str, opening: F) -> FragmentStream
where
    F: Future<Output = Result<RawFragments>> + Send + 'static,
{
    Box::pin(stream! {
        let mut fragments = match opening.await {
            Ok(fragments) => fragments,
            Err(err) => {
                tracing::warn!(backend, error = %format!("{err:#}"), "relay failed to start");
                yield error_fragment(&err);
                return;
            }
        };

        while let Some(item) = fragments.next().await {
            match item {
                Ok(text) => yield text,
                Err(err) => {
                    tracing::warn!(backend, error = %format!("{err:#}"), "relay failed mid-stream");
                    yield error_fragment(&err);
                    break;
                }
            }
        }
    })
}

pub fn build_relay(config: &AppConfig) -> Result<Arc<dyn CompletionRelay>> {
    let relay: Arc<dyn CompletionRelay> = match config.relay_backend {
        RelayBackend::Sdk => Arc::new(SdkRelay::new(anthropic_settings(config)?)),
        RelayBackend::Http => Arc::new(HttpRelay::new(
            anthropic_settings(config)?,
            Duration::from_secs(config.relay_timeout_secs),
        )?),
        RelayBackend::Cli => Arc::new(CliRelay::new(config.relay_cli_program.clone())),
    };
    Ok(relay)
}

fn anthropic_settings(config: &AppConfig) -> Result<AnthropicSettings> {
    let api_key = config.anthropic_api_key.clone().with_context(|| {
        format!(
            "ANTHROPIC_API_KEY must be set for the {} relay backend",
            config.relay_backend.as_str()
        )
    })?;
    Ok(AnthropicSettings {
        api_key,
        base_url: config.anthropic_base_url.clone(),
        model: config.anthropic_model.clone(),
        max_tokens: config.anthropic_max_tokens,
    })
}
