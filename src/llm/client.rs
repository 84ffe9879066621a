//! Streaming LLM client
//!
//! `HttpLlmClient` speaks the OpenRouter-compatible chat-completions
//! protocol with `stream: true` and yields the delta text fragments as they
//! arrive. `StaticLlmClient` replays canned responses for tests and
//! offline runs.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::{header, Client};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::llm::types::{ChatRequest, LlmToolDescriptor, Message, ToolMode};

/// An async stream of response text fragments
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The LLM chat adapter seam
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat request and stream back the response text
    async fn send_request(&self, request: ChatRequest) -> Result<TextStream>;

    /// The model this client targets by default
    fn default_model(&self) -> &str;
}

/// Collect a [`TextStream`] into a single string
pub async fn drain_text(mut stream: TextStream) -> Result<String> {
    let mut out = String::new();
    while let Some(fragment) = stream.next().await {
        out.push_str(&fragment?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// OpenRouter-compatible streaming client
#[derive(Clone)]
pub struct HttpLlmClient {
    client: Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl HttpLlmClient {
    /// Create a new client from configuration
    pub fn new(config: LlmConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret()))
                .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(HttpLlmClient { client, config })
    }

    fn build_body(&self, request: &ChatRequest) -> WireRequest {
        let tools = request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t: &LlmToolDescriptor| WireTool {
                    tool_type: "function".to_string(),
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters_schema.clone(),
                    },
                })
                .collect()
        });

        let tool_choice = request.tool_mode.map(|mode| {
            match mode {
                ToolMode::Auto => "auto",
                ToolMode::None => "none",
                ToolMode::Required => "required",
            }
            .to_string()
        });

        WireRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone()),
            messages: request.messages.clone(),
            stream: true,
            max_tokens: request.options.max_tokens,
            temperature: request.options.temperature,
            top_p: request.options.top_p,
            tools,
            tool_choice,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn send_request(&self, request: ChatRequest) -> Result<TextStream> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = self.build_body(&request);

        debug!(
            "Sending LLM request: model={}, justification={}",
            body.model, request.justification
        );

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("LLM API error ({}): {}", status, error_text);
            return Err(Error::Llm(format!("API error ({}): {}", status, error_text)));
        }

        let inner: BoxStream<'static, reqwest::Result<bytes::Bytes>> =
            response.bytes_stream().boxed();

        let state = SseState {
            inner,
            buffer: String::new(),
            pending: VecDeque::new(),
        };

        let stream = futures::stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(fragment) = state.pending.pop_front() {
                    return Ok(Some((fragment, state)));
                }

                match state.inner.next().await {
                    Some(Ok(bytes)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                        state.drain_lines();
                    }
                    Some(Err(e)) => return Err(Error::from(e)),
                    None => return Ok(None),
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }
}

struct SseState {
    inner: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: String,
    pending: VecDeque<String>,
}

impl SseState {
    /// Split complete SSE lines out of the buffer and queue their text deltas
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }

            match serde_json::from_str::<StreamChunk>(data) {
                Ok(chunk) => {
                    if let Some(content) = chunk
                        .choices
                        .first()
                        .and_then(|c| c.delta.content.clone())
                    {
                        if !content.is_empty() {
                            self.pending.push_back(content);
                        }
                    }
                }
                Err(e) => {
                    debug!("Skipping unparseable SSE chunk: {}", e);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Static implementation
// ---------------------------------------------------------------------------

/// Client that replays queued responses in order
///
/// Each queued string is emitted as a short stream of fragments. When the
/// queue runs dry the client yields an empty stream, which callers treat as
/// an empty LLM response.
pub struct StaticLlmClient {
    responses: std::sync::Mutex<VecDeque<String>>,
    model: String,
    /// Requests seen, for assertions
    requests: std::sync::Mutex<Vec<ChatRequest>>,
}

impl StaticLlmClient {
    /// Create a client that will replay `responses` in order
    pub fn new(responses: Vec<String>) -> Self {
        StaticLlmClient {
            responses: std::sync::Mutex::new(responses.into()),
            model: "static".to_string(),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Requests recorded so far
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LlmClient for StaticLlmClient {
    async fn send_request(&self, request: ChatRequest) -> Result<TextStream> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        let fragments: Vec<Result<String>> = match next {
            // Split roughly in half so consumers exercise real draining
            Some(text) => {
                let mid = text
                    .char_indices()
                    .nth(text.chars().count() / 2)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                vec![Ok(text[..mid].to_string()), Ok(text[mid..].to_string())]
            }
            None => vec![],
        };

        Ok(Box::pin(futures::stream::iter(fragments)))
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}
