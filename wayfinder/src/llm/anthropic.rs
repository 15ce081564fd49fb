//! Anthropic Messages API provider. Canonical capability set: tools,
//! images, streaming.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::NavigationError;

use super::provider::{ChunkStream, LlmProvider};
use super::types::{
    ChatMessage, ChatRole, ContentPart, LlmResponse, StopReason, StreamChunk, TokenUsage, ToolCall,
    ToolSpec,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContent {
    Text {
        text: String,
    },
    Image {
        source: AnthropicImageSource,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [AnthropicMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool<'a>>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicSseEvent {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<AnthropicSseDelta>,
}

#[derive(Debug, Deserialize)]
struct AnthropicSseDelta {
    text: Option<String>,
    stop_reason: Option<String>,
}

fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("max_tokens") => StopReason::MaxTokens,
        Some("tool_use") => StopReason::ToolUse,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    system: Mutex<Option<String>>,
    history: Mutex<Vec<AnthropicMessage>>,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_API_BASE.to_string()),
            client: Client::new(),
            system: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    fn to_native(message: &ChatMessage) -> AnthropicMessage {
        let role = match message.role {
            ChatRole::Assistant => "assistant",
            _ => "user",
        };
        let content = message
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => AnthropicContent::Text { text: text.clone() },
                ContentPart::Image { media_type, data } => AnthropicContent::Image {
                    source: AnthropicImageSource {
                        source_type: "base64".to_string(),
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                },
                ContentPart::ToolResult { tool_use_id, text } => AnthropicContent::ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: text.clone(),
                },
            })
            .collect();
        AnthropicMessage {
            role: role.to_string(),
            content,
        }
    }

    fn native_messages(&self, messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system = None;
        let mut native = Vec::new();
        for message in messages {
            if message.role == ChatRole::System {
                system = Some(message.flat_text());
            } else {
                native.push(Self::to_native(message));
            }
        }
        (system, native)
    }

    async fn post(
        &self,
        system: Option<&str>,
        messages: &[AnthropicMessage],
        tools: Option<&[ToolSpec]>,
        stream: bool,
    ) -> Result<reqwest::Response, NavigationError> {
        let tools = tools.map(|specs| {
            specs
                .iter()
                .map(|spec| AnthropicTool {
                    name: &spec.name,
                    description: &spec.description,
                    input_schema: &spec.input_schema,
                })
                .collect()
        });

        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: DEFAULT_MAX_TOKENS,
            system,
            messages,
            tools,
            stream,
        };

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| NavigationError::Provider(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(NavigationError::RateLimited(format!(
                    "Anthropic rate limit: {body}"
                )));
            }
            return Err(NavigationError::Provider(format!(
                "Anthropic API error ({status}): {body}"
            )));
        }
        Ok(response)
    }

    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[AnthropicMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        let response = self.post(system, messages, tools, false).await?;
        let parsed: AnthropicResponse = response.json().await.map_err(|e| {
            NavigationError::Provider(format!("Failed to parse Anthropic response: {e}"))
        })?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                AnthropicResponseBlock::Text { text } => content.push_str(&text),
                AnthropicResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, input })
                }
                AnthropicResponseBlock::Unknown => {}
            }
        }

        Ok(LlmResponse {
            content,
            tool_calls,
            stop_reason: map_stop_reason(parsed.stop_reason.as_deref()),
            usage: parsed.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn push_message(&self, message: ChatMessage) {
        if message.role == ChatRole::System {
            *self.system.lock().unwrap() = Some(message.flat_text());
            return;
        }
        self.history.lock().unwrap().push(Self::to_native(&message));
    }

    fn clear_history(&self) {
        self.history.lock().unwrap().clear();
        *self.system.lock().unwrap() = None;
    }

    fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    async fn send(&self, tools: Option<&[ToolSpec]>) -> Result<LlmResponse, NavigationError> {
        let system = self.system.lock().unwrap().clone();
        let messages = self.history.lock().unwrap().clone();
        self.complete(system.as_deref(), &messages, tools).await
    }

    async fn send_once(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        let (system, native) = self.native_messages(messages);
        self.complete(system.as_deref(), &native, tools).await
    }

    async fn stream(&self, tools: Option<&[ToolSpec]>) -> Result<ChunkStream, NavigationError> {
        let system = self.system.lock().unwrap().clone();
        let messages = self.history.lock().unwrap().clone();
        let response = self.post(system.as_deref(), &messages, tools, true).await?;

        let stream = response.bytes_stream().map(|chunk| {
            let bytes = chunk
                .map_err(|e| NavigationError::Provider(format!("Anthropic stream error: {e}")))?;
            let text = String::from_utf8_lossy(&bytes);
            let mut delta = String::new();
            let mut stop_reason = None;

            for line in text.lines() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if let Ok(event) = serde_json::from_str::<AnthropicSseEvent>(data) {
                    match event.event_type.as_str() {
                        "content_block_delta" => {
                            if let Some(text) = event.delta.and_then(|d| d.text) {
                                delta.push_str(&text);
                            }
                        }
                        "message_delta" => {
                            stop_reason = Some(map_stop_reason(
                                event.delta.and_then(|d| d.stop_reason).as_deref(),
                            ));
                        }
                        _ => {}
                    }
                }
            }

            Ok(StreamChunk { delta, stop_reason })
        });

        Ok(Box::pin(stream))
    }
}
