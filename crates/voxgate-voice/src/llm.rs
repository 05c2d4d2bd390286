//! Streaming LLM client.
//!
//! The dialogue controller talks to the LLM through [`LlmBackend`]: a
//! streaming call that yields token deltas for live speech, and a
//! one-shot completion used by the end-of-call analyzer. The production
//! implementation speaks the SSE chat-completions wire format
//! (`data: {...}` lines, terminated by `data: [DONE]`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::GatewayError;

/// Connect timeout for LLM requests. There is no first-token timeout —
/// the stream is awaited for as long as the session stays interested.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

// ── Request / response shapes ──────────────────────────────────────

/// One chat message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

// ── Backend trait ──────────────────────────────────────────────────

/// Port for LLM access.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Open a streaming completion. Token deltas arrive on the returned
    /// channel; the channel closing means the stream ended (normally or
    /// not — partial progress is still spoken either way).
    async fn stream_chat(&self, request: ChatRequest)
        -> Result<mpsc::Receiver<String>, GatewayError>;

    /// One-shot completion for post-call classification.
    async fn complete(&self, request: ChatRequest) -> Result<String, GatewayError>;
}

// ── SSE implementation ─────────────────────────────────────────────

/// Chat-completions client speaking the SSE streaming wire format.
pub struct SseLlmClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl SseLlmClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::transient("llm", e))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl LlmBackend for SseLlmClient {
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<String>, GatewayError> {
        let started = Instant::now();

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&WireRequest {
                model: &request.model,
                messages: &request.messages,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| GatewayError::transient("llm", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::transient("llm", format!("HTTP {status}")));
        }

        let (delta_tx, delta_rx) = mpsc::channel::<String>(64);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut carry = String::new();
            let mut first_token_logged = false;

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        // Truncated stream: everything delivered so far
                        // has already been forwarded, which is exactly
                        // the partial-progress behavior we want.
                        tracing::warn!(error = %e, "LLM stream ended early");
                        break;
                    }
                };
                carry.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = carry.find('\n') {
                    let line: String = carry.drain(..=newline).collect();
                    let Some(delta) = parse_sse_line(line.trim()) else {
                        continue;
                    };
                    match delta {
                        SseLine::Done => return,
                        SseLine::Delta(text) => {
                            if !first_token_logged {
                                first_token_logged = true;
                                tracing::debug!(
                                    latency_ms = started.elapsed().as_millis() as u64,
                                    "LLM first token"
                                );
                            }
                            if delta_tx.send(text).await.is_err() {
                                // Consumer lost interest (stale session).
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(delta_rx)
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&WireRequest {
                model: &request.model,
                messages: &request.messages,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| GatewayError::transient("llm", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::transient("llm", format!("HTTP {status}")));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::contract("llm", e))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::contract("llm", "empty choices"))
    }
}

enum SseLine {
    Delta(String),
    Done,
}

fn parse_sse_line(line: &str) -> Option<SseLine> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseLine::Done);
    }
    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    let content = chunk.choices.into_iter().next()?.delta.content?;
    if content.is_empty() {
        None
    } else {
        Some(SseLine::Delta(content))
    }
}
