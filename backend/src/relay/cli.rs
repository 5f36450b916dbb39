use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_stream::stream;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use super::{guarded, CompletionRelay, FragmentStream, RawFragments};

const PROMPT_FLAG: &str = "-p";
const ATTACHMENT_FLAG: &str = "--file";

/// Relay that shells out to a local command-line model client and streams
/// its standard output, one line per fragment.
#[derive(Clone)]
pub struct CliRelay {
    program: Arc<str>,
    base_args: Arc<[String]>,
}

impl CliRelay {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: Arc::from(program.into()),
            base_args: Arc::from(Vec::new()),
        }
    }

    /// Arguments placed before the prompt and attachment flags.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self, prompt: &str, files: &[String]) -> Command {
        let mut command = Command::new(&*self.program);
        command.args(self.base_args.iter()).arg(PROMPT_FLAG).arg(prompt);
        for file in files {
            command.arg(ATTACHMENT_FLAG).arg(file);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn open(self, prompt: String, files: Vec<String>) -> Result<RawFragments> {
        let program = self.program.clone();
        let mut child = self
            .command(&prompt, &files)
            .spawn()
            .with_context(|| format!("failed to start {program}"))?;
        let stdout = child.stdout.take().context("stdout was not captured")?;
        let mut stderr = child.stderr.take().context("stderr was not captured")?;

        // Drained alongside stdout so a chatty stderr cannot block the child.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            let _ = stderr.read_to_string(&mut output).await;
            output
        });

        tracing::debug!(%program, attachments = files.len(), "spawned relay process");

        Ok(Box::pin(stream! {
            let mut lines = BufReader::new(stdout).lines();
            let mut read_failed = false;

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => yield Ok(format!("{line}\n")),
                    Ok(None) => break,
                    Err(err) => {
                        read_failed = true;
                        yield Err(anyhow::Error::new(err).context(format!("failed to read output of {program}")));
                        break;
                    }
                }
            }

            if !read_failed {
                match child.wait().await {
                    Ok(status) if status.success() => {}
                    Ok(status) => {
                        let stderr = stderr_task.await.unwrap_or_default();
                        yield Err(anyhow!("{program} exited with {status}: {}", stderr.trim()));
                    }
                    Err(err) => {
                        yield Err(anyhow::Error::new(err).context(format!("failed to wait for {program}")));
                    }
                }
            }
        }))
    }
}

impl CompletionRelay for CliRelay {
    fn stream(&self, prompt: &str, files: &[String]) -> FragmentStream {
        let relay = self.clone();
        guarded("cli", relay.open(prompt.to_string(), files.to_vec()))
    }
}
