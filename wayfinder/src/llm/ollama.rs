//! Local HTTP provider speaking the Ollama chat protocol. No API key, no
//! tool calling, and image payloads are dropped: text-only in practice.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::NavigationError;

use super::provider::{ChunkStream, LlmProvider};
use super::types::{ChatMessage, ChatRole, LlmResponse, StopReason, StreamChunk, ToolSpec};

const OLLAMA_API_BASE: &str = "http://localhost:11434";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [OllamaMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
}

fn map_done_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("length") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

pub struct OllamaProvider {
    model: String,
    base_url: String,
    client: Client,
    history: Mutex<Vec<OllamaMessage>>,
}

impl OllamaProvider {
    pub fn new(model: String, base_url: Option<String>) -> Self {
        Self {
            model,
            base_url: base_url.unwrap_or_else(|| OLLAMA_API_BASE.to_string()),
            client: Client::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    fn to_native(message: &ChatMessage) -> OllamaMessage {
        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        OllamaMessage {
            role: role.to_string(),
            content: message.flat_text(),
        }
    }

    async fn post(
        &self,
        messages: &[OllamaMessage],
        stream: bool,
    ) -> Result<reqwest::Response, NavigationError> {
        let request = OllamaRequest {
            model: &self.model,
            messages,
            stream,
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| NavigationError::Provider(format!("Ollama request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NavigationError::Provider(format!(
                "Ollama API error ({status}): {body}"
            )));
        }
        Ok(response)
    }

    async fn complete(&self, messages: &[OllamaMessage]) -> Result<LlmResponse, NavigationError> {
        let response = self.post(messages, false).await?;
        let parsed: OllamaResponse = response.json().await.map_err(|e| {
            NavigationError::Provider(format!("Failed to parse Ollama response: {e}"))
        })?;

        Ok(LlmResponse {
            content: parsed.message.map(|m| m.content).unwrap_or_default(),
            tool_calls: Vec::new(),
            stop_reason: map_done_reason(parsed.done_reason.as_deref()),
            usage: None,
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn supports_tools(&self) -> bool {
        false
    }

    fn supports_images(&self) -> bool {
        false
    }

    fn push_message(&self, message: ChatMessage) {
        self.history.lock().unwrap().push(Self::to_native(&message));
    }

    fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }

    fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    async fn send(&self, _tools: Option<&[ToolSpec]>) -> Result<LlmResponse, NavigationError> {
        let messages = self.history.lock().unwrap().clone();
        self.complete(&messages).await
    }

    async fn send_once(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        let native: Vec<OllamaMessage> = messages.iter().map(Self::to_native).collect();
        self.complete(&native).await
    }

    async fn stream(&self, _tools: Option<&[ToolSpec]>) -> Result<ChunkStream, NavigationError> {
        let messages = self.history.lock().unwrap().clone();
        let response = self.post(&messages, true).await?;

        // Ollama streams newline-delimited JSON objects rather than SSE.
        let stream = response.bytes_stream().map(|chunk| {
            let bytes =
                chunk.map_err(|e| NavigationError::Provider(format!("Ollama stream error: {e}")))?;
            let text = String::from_utf8_lossy(&bytes);
            let mut delta = String::new();
            let mut stop_reason = None;

            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                if let Ok(event) = serde_json::from_str::<OllamaResponse>(line) {
                    if let Some(message) = event.message {
                        delta.push_str(&message.content);
                    }
                    if event.done {
                        stop_reason = Some(map_done_reason(event.done_reason.as_deref()));
                    }
                }
            }

            Ok(StreamChunk { delta, stop_reason })
        });

        Ok(Box::pin(stream))
    }
}
