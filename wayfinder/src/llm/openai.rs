//! OpenAI-compatible chat-completions provider. Also serves local or hosted
//! gateways that speak the same wire format.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::NavigationError;

use super::provider::{ChunkStream, LlmProvider};
use super::types::{
    ChatMessage, ChatRole, ContentPart, LlmResponse, StopReason, StreamChunk, TokenUsage, ToolCall,
    ToolSpec,
};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [OpenAiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    /// JSON-encoded argument object.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiSseEvent {
    choices: Vec<OpenAiSseChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiSseChoice {
    delta: OpenAiSseDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiSseDelta {
    content: Option<String>,
}

fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

pub struct OpenAiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    history: Mutex<Vec<OpenAiMessage>>,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| OPENAI_API_BASE.to_string()),
            client: Client::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    fn to_native(message: &ChatMessage) -> OpenAiMessage {
        // Tool results use the dedicated "tool" role in this wire format.
        if let Some(ContentPart::ToolResult { tool_use_id, text }) = message
            .parts
            .iter()
            .find(|part| matches!(part, ContentPart::ToolResult { .. }))
        {
            return OpenAiMessage {
                role: "tool".to_string(),
                content: Value::String(text.clone()),
                tool_call_id: Some(tool_use_id.clone()),
            };
        }

        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };

        let content = if message.has_images() {
            let parts: Vec<Value> = message
                .parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(json!({"type": "text", "text": text})),
                    ContentPart::Image { media_type, data } => Some(json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:{media_type};base64,{data}")}
                    })),
                    ContentPart::ToolResult { .. } => None,
                })
                .collect();
            Value::Array(parts)
        } else {
            Value::String(message.flat_text())
        };

        OpenAiMessage {
            role: role.to_string(),
            content,
            tool_call_id: None,
        }
    }

    fn native_tools(tools: &[ToolSpec]) -> Vec<Value> {
        tools
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.input_schema,
                    }
                })
            })
            .collect()
    }

    async fn post(
        &self,
        messages: &[OpenAiMessage],
        tools: Option<&[ToolSpec]>,
        stream: bool,
    ) -> Result<reqwest::Response, NavigationError> {
        let request = OpenAiRequest {
            model: &self.model,
            messages,
            tools: tools.map(Self::native_tools),
            stream,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| NavigationError::Provider(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(NavigationError::RateLimited(format!(
                    "OpenAI rate limit: {body}"
                )));
            }
            return Err(NavigationError::Provider(format!(
                "OpenAI API error ({status}): {body}"
            )));
        }
        Ok(response)
    }

    async fn complete(
        &self,
        messages: &[OpenAiMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        let response = self.post(messages, tools, false).await?;
        let parsed: OpenAiResponse = response.json().await.map_err(|e| {
            NavigationError::Provider(format!("Failed to parse OpenAI response: {e}"))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| NavigationError::Provider("No completion choices returned".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let input = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::Object(Default::default()));
                ToolCall {
                    id: call.id,
                    name: call.function.name,
                    input,
                }
            })
            .collect();

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            stop_reason: map_finish_reason(choice.finish_reason.as_deref()),
            usage: parsed.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
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

    async fn send(&self, tools: Option<&[ToolSpec]>) -> Result<LlmResponse, NavigationError> {
        let messages = self.history.lock().unwrap().clone();
        self.complete(&messages, tools).await
    }

    async fn send_once(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        let native: Vec<OpenAiMessage> = messages.iter().map(Self::to_native).collect();
        self.complete(&native, tools).await
    }

    async fn stream(&self, tools: Option<&[ToolSpec]>) -> Result<ChunkStream, NavigationError> {
        let messages = self.history.lock().unwrap().clone();
        let response = self.post(&messages, tools, true).await?;

        let stream = response.bytes_stream().map(|chunk| {
            let bytes =
                chunk.map_err(|e| NavigationError::Provider(format!("OpenAI stream error: {e}")))?;
            let text = String::from_utf8_lossy(&bytes);
            let mut delta = String::new();
            let mut stop_reason = None;

            for line in text.lines() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    stop_reason.get_or_insert(StopReason::EndTurn);
                    continue;
                }
                if let Ok(event) = serde_json::from_str::<OpenAiSseEvent>(data) {
                    if let Some(choice) = event.choices.into_iter().next() {
                        if let Some(content) = choice.delta.content {
                            delta.push_str(&content);
                        }
                        if choice.finish_reason.is_some() {
                            stop_reason = Some(map_finish_reason(choice.finish_reason.as_deref()));
                        }
                    }
                }
            }

            Ok(StreamChunk { delta, stop_reason })
        });

        Ok(Box::pin(stream))
    }
}
