//! One-shot HTTP server that replays a scripted server-sent-event response.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::AnthropicSettings;

pub(crate) struct Script {
    status: &'static str,
    chunks: Vec<(Duration, String)>,
}

impl Script {
    pub(crate) fn ok() -> Self {
        Self {
            status: "200 OK",
            chunks: Vec::new(),
        }
    }

    pub(crate) fn status(status: &'static str, body: &str) -> Self {
        Self {
            status,
            chunks: vec![(Duration::ZERO, body.to_string())],
        }
    }

    pub(crate) fn event(self, name: &str, data: &str) -> Self {
        self.event_after(Duration::ZERO, name, data)
    }

    pub(crate) fn event_after(mut self, delay: Duration, name: &str, data: &str) -> Self {
        self.chunks
            .push((delay, format!("event: {name}\ndata: {data}\n\n")));
        self
    }

    pub(crate) fn text_delta(self, text: &str) -> Self {
        self.text_delta_after(Duration::ZERO, text)
    }

    pub(crate) fn text_delta_after(self, delay: Duration, text: &str) -> Self {
        let data = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": text },
        });
        self.event_after(delay, "content_block_delta", &data.to_string())
    }

    pub(crate) fn stop(self) -> Self {
        self.event("message_stop", r#"{"type":"message_stop"}"#)
    }
}

/// Serves `script` to the first connection. The handle resolves to the raw
/// request head the client sent.
pub(crate) async fn serve(script: Script) -> (AnthropicSettings, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub server");
    let addr = listener.local_addr().expect("stub server address");

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept relay connection");
        let head = read_request(&mut socket).await;

        let preamble = format!(
            "HTTP/1.1 {}\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
            script.status
        );
        if socket.write_all(preamble.as_bytes()).await.is_err() {
            return head;
        }
        for (delay, chunk) in script.chunks {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if socket.write_all(chunk.as_bytes()).await.is_err() {
                return head;
            }
            let _ = socket.flush().await;
        }
        let _ = socket.shutdown().await;
        head
    });

    let settings = AnthropicSettings {
        api_key: "test-key".to_string(),
        base_url: format!("http://{addr}"),
        model: "test-model".to_string(),
        max_tokens: 64,
    };
    (settings, handle)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let body_len = content_length(&head);
            while buf.len() < end + 4 + body_len {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            return head;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&buf).to_string(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}
