
use anyhow::Context;
use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{ChatMessage, CompletionClient, CompletionStream};
use crate::config::CompletionConfig;
use crate::{RagError, Result};

/// Client for OpenAI-compatible `/chat/completions` endpoints (OpenRouter by default)
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    referer: String,
    app_title: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &CompletionConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join("chat/completions"))
            .with_context(|| format!("Invalid completion base URL: {}", config.base_url))?;

        if api_key.is_none() {
            warn!(
                "No API key found in {}; completion requests are sent unauthenticated",
                config.api_key_env
            );
        }

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            referer: config.referer.clone(),
            app_title: config.app_title.clone(),
            agent,
        })
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<ureq::http::Response<ureq::Body>> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| RagError::Completion(format!("Failed to serialize request: {}", e)))?;

        debug!(
            "Sending {} messages to {} (stream: {})",
            messages.len(),
            self.endpoint,
            stream
        );

        let mut builder = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.app_title);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", &format!("Bearer {}", key));
        }

        builder.send(&body).map_err(|e| match e {
            ureq::Error::StatusCode(code) => {
                RagError::Completion(format!("Completion service returned HTTP {}", code))
            }
            other => RagError::Network(format!("Completion request failed: {}", other)),
        })
    }

    /// Blocking single-shot completion
    #[inline]
    pub fn complete_blocking(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut response = self.send(messages, false)?;
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| RagError::Network(format!("Failed to read completion: {}", e)))?;

        let parsed: CompletionResponse = serde_json::from_str(&text)
            .map_err(|e| RagError::Completion(format!("Invalid completion response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::Completion("Completion response has no content".to_string()))
    }
}

/// Parse one server-sent event line; `None` means the line carries no text
fn parse_stream_line(line: &str) -> Option<StreamLine> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return Some(StreamLine::Done);
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(StreamLine::Text),
        Err(e) => {
            debug!("Skipping unparseable stream line: {}", e);
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamLine {
    Text(String),
    Done,
}

fn forward_stream(reader: impl Read, sender: &mpsc::UnboundedSender<Result<String>>) {
    for line in BufReader::new(reader).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                let _ = sender.unbounded_send(Err(RagError::Network(format!(
                    "Completion stream interrupted: {}",
                    e
                ))));
                return;
            }
        };

        match parse_stream_line(&line) {
            Some(StreamLine::Text(text)) => {
                if sender.unbounded_send(Ok(text)).is_err() {
                    // Receiver dropped
                    return;
                }
            }
            Some(StreamLine::Done) => return,
            None => {}
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    #[inline]
    fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let client = self.clone();
        let messages = messages.to_vec();

        tokio::task::spawn_blocking(move || client.complete_blocking(&messages))
            .await
            .map_err(|e| RagError::Completion(format!("Completion task failed: {}", e)))?
    }

    #[inline]
    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<CompletionStream> {
        let client = self.clone();
        let messages = messages.to_vec();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::unbounded();

        tokio::task::spawn_blocking(move || match client.send(&messages, true) {
            Ok(response) => {
                if ready_tx.send(Ok(())).is_ok() {
                    forward_stream(response.into_body().into_reader(), &chunk_tx);
                }
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        });

        ready_rx
            .await
            .map_err(|_| RagError::Completion("Completion task ended unexpectedly".to_string()))??;

        Ok(chunk_rx.boxed())
    }
}
