//! Gemini provider. Accepts images; tool calling is not wired through, so
//! the orchestrator downgrades tool requests to text-only with a warning.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::NavigationError;

use super::provider::{ChunkStream, LlmProvider};
use super::types::{
    ChatMessage, ChatRole, ContentPart, LlmResponse, StopReason, StreamChunk, TokenUsage, ToolSpec,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// Gemini parts are objects keyed by kind ("text" / "inline_data"), so they
// are built as raw JSON values rather than a tagged enum.
enum GeminiPart {
    Text(String),
    InlineData { mime_type: String, data: String },
}

impl GeminiPart {
    fn to_wire(&self) -> serde_json::Value {
        match self {
            GeminiPart::Text(text) => serde_json::json!({ "text": text }),
            GeminiPart::InlineData { mime_type, data } => serde_json::json!({
                "inline_data": { "mime_type": mime_type, "data": data }
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: &'a [GeminiContent],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("MAX_TOKENS") => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

pub struct GeminiProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    system: Mutex<Option<String>>,
    history: Mutex<Vec<GeminiContent>>,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| GEMINI_API_BASE.to_string()),
            client: Client::new(),
            system: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    fn to_native(message: &ChatMessage) -> GeminiContent {
        // Role mapping: assistant turns are "model", everything else "user".
        let role = match message.role {
            ChatRole::Assistant => "model",
            _ => "user",
        };
        let parts = message
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => GeminiPart::Text(text.clone()).to_wire(),
                ContentPart::Image { media_type, data } => GeminiPart::InlineData {
                    mime_type: media_type.clone(),
                    data: data.clone(),
                }
                .to_wire(),
                ContentPart::ToolResult { text, .. } => GeminiPart::Text(text.clone()).to_wire(),
            })
            .collect();
        GeminiContent {
            role: role.to_string(),
            parts,
        }
    }

    async fn post(
        &self,
        contents: &[GeminiContent],
        system: Option<&str>,
        stream: bool,
    ) -> Result<reqwest::Response, NavigationError> {
        let request = GeminiRequest {
            contents,
            system_instruction: system
                .map(|text| serde_json::json!({ "parts": [{ "text": text }] })),
        };

        let verb = if stream {
            "streamGenerateContent?alt=sse&key="
        } else {
            "generateContent?key="
        };
        let url = format!("{}/models/{}:{}{}", self.base_url, self.model, verb, self.api_key);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| NavigationError::Provider(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(NavigationError::RateLimited(format!(
                    "Gemini rate limit: {body}"
                )));
            }
            return Err(NavigationError::Provider(format!(
                "Gemini API error ({status}): {body}"
            )));
        }
        Ok(response)
    }

    async fn complete(
        &self,
        contents: &[GeminiContent],
        system: Option<&str>,
    ) -> Result<LlmResponse, NavigationError> {
        let response = self.post(contents, system, false).await?;
        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            NavigationError::Provider(format!("Failed to parse Gemini response: {e}"))
        })?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| NavigationError::Provider("No candidates returned".into()))?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            tool_calls: Vec::new(),
            stop_reason: map_finish_reason(candidate.finish_reason.as_deref()),
            usage: parsed.usage_metadata.map(|u| TokenUsage {
                input_tokens: u.prompt_token_count.unwrap_or(0),
                output_tokens: u.candidates_token_count.unwrap_or(0),
            }),
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn supports_tools(&self) -> bool {
        false
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

    async fn send(&self, _tools: Option<&[ToolSpec]>) -> Result<LlmResponse, NavigationError> {
        let system = self.system.lock().unwrap().clone();
        let contents = self.history.lock().unwrap().clone();
        self.complete(&contents, system.as_deref()).await
    }

    async fn send_once(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        let mut system = None;
        let mut contents = Vec::new();
        for message in messages {
            if message.role == ChatRole::System {
                system = Some(message.flat_text());
            } else {
                contents.push(Self::to_native(message));
            }
        }
        self.complete(&contents, system.as_deref()).await
    }

    async fn stream(&self, _tools: Option<&[ToolSpec]>) -> Result<ChunkStream, NavigationError> {
        let system = self.system.lock().unwrap().clone();
        let contents = self.history.lock().unwrap().clone();
        let response = self.post(&contents, system.as_deref(), true).await?;

        let stream = response.bytes_stream().map(|chunk| {
            let bytes =
                chunk.map_err(|e| NavigationError::Provider(format!("Gemini stream error: {e}")))?;
            let text = String::from_utf8_lossy(&bytes);
            let mut delta = String::new();
            let mut stop_reason = None;

            for line in text.lines() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if let Ok(event) = serde_json::from_str::<GeminiResponse>(data) {
                    for candidate in event.candidates {
                        if let Some(content) = candidate.content {
                            for part in content.parts {
                                if let Some(text) = part.text {
                                    delta.push_str(&text);
                                }
                            }
                        }
                        if candidate.finish_reason.is_some() {
                            stop_reason =
                                Some(map_finish_reason(candidate.finish_reason.as_deref()));
                        }
                    }
                }
            }

            Ok(StreamChunk { delta, stop_reason })
        });

        Ok(Box::pin(stream))
    }
}
