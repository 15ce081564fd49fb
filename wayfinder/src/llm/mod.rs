//! Multi-mode LLM orchestration.
//!
//! Three roles: `default` (stateful, tool-calling), `fast` (stateless,
//! cheap) and `vision` (stateless, image-capable). Modes that are not
//! configured fall back to `default`. Providers own their history in their
//! native wire shape; this module only speaks semantic verbs.

mod anthropic;
mod gemini;
mod ollama;
mod openai;
mod provider;
#[cfg(test)]
pub(crate) mod testing;
mod types;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{LlmConfig, ProviderConfig, ProviderKind};
use crate::errors::NavigationError;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use provider::{ChunkStream, LlmProvider};
pub use types::{
    ChatMessage, ChatRole, ContentPart, LlmMode, LlmResponse, StopReason, StreamChunk, TokenUsage,
    ToolCall, ToolSpec,
};

/// Backoff before the single automatic retry on provider throttling.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(1);

/// Construct a provider from its injected configuration.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, NavigationError> {
    let require_key = || {
        config.api_key.clone().ok_or_else(|| {
            NavigationError::InvalidArgument(format!(
                "Provider {:?} requires an API key",
                config.kind
            ))
        })
    };

    Ok(match config.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            require_key()?,
            config.model.clone(),
            config.base_url.clone(),
        )),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            require_key()?,
            config.model.clone(),
            config.base_url.clone(),
        )),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(
            require_key()?,
            config.model.clone(),
            config.base_url.clone(),
        )),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(
            config.model.clone(),
            config.base_url.clone(),
        )),
    })
}

pub struct Orchestrator {
    default: Arc<dyn LlmProvider>,
    fast: Option<Arc<dyn LlmProvider>>,
    vision: Option<Arc<dyn LlmProvider>>,
    /// One-time capability warnings, keyed by provider and gap.
    warned: Mutex<HashSet<String>>,
}

impl Orchestrator {
    /// Single-mode configuration: every mode is served by one provider.
    pub fn single(default: Arc<dyn LlmProvider>) -> Self {
        Self {
            default,
            fast: None,
            vision: None,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Multi-mode configuration with dedicated fast/vision providers.
    pub fn multi(
        default: Arc<dyn LlmProvider>,
        fast: Option<Arc<dyn LlmProvider>>,
        vision: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            default,
            fast,
            vision,
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, NavigationError> {
        let default = build_provider(&config.default)?;
        let fast = config.fast.as_ref().map(build_provider).transpose()?;
        let vision = config.vision.as_ref().map(build_provider).transpose()?;
        Ok(Self::multi(default, fast, vision))
    }

    fn provider_for(&self, mode: LlmMode) -> &Arc<dyn LlmProvider> {
        match mode {
            LlmMode::Default => &self.default,
            LlmMode::Fast => self.fast.as_ref().unwrap_or(&self.default),
            LlmMode::Vision => self.vision.as_ref().unwrap_or(&self.default),
        }
    }

    fn warn_once(&self, key: String, message: &str) {
        if self.warned.lock().unwrap().insert(key) {
            warn!("{message}");
        }
    }

    /// Drop tool specs for providers that cannot call tools; the provider
    /// then returns a text-only response.
    fn effective_tools<'t>(
        &self,
        provider: &Arc<dyn LlmProvider>,
        tools: Option<&'t [ToolSpec]>,
    ) -> Option<&'t [ToolSpec]> {
        if tools.is_some() && !provider.supports_tools() {
            self.warn_once(
                format!("{}:tools", provider.name()),
                &format!(
                    "Provider '{}' does not support tool calling; returning text-only responses",
                    provider.name()
                ),
            );
            return None;
        }
        tools
    }

    fn check_images(&self, provider: &Arc<dyn LlmProvider>, messages: &[ChatMessage]) {
        if !provider.supports_images() && messages.iter().any(ChatMessage::has_images) {
            self.warn_once(
                format!("{}:images", provider.name()),
                &format!(
                    "Provider '{}' does not accept images; image parts will be dropped",
                    provider.name()
                ),
            );
        }
    }

    // ---- stateful verbs (default mode) ----

    pub fn add_user_message(&self, content: impl Into<String>) {
        self.default.push_message(ChatMessage::user(content.into()));
    }

    pub fn add_user_parts(&self, parts: Vec<ContentPart>) {
        self.default.push_message(ChatMessage {
            role: ChatRole::User,
            parts,
        });
    }

    pub fn add_assistant_message(&self, text: impl Into<String>) {
        self.default
            .push_message(ChatMessage::assistant(text.into()));
    }

    pub fn add_tool_result(&self, tool_use_id: impl Into<String>, text: impl Into<String>) {
        self.default
            .push_message(ChatMessage::tool_result(tool_use_id, text));
    }

    pub fn clear_history(&self) {
        self.default.clear_history();
    }

    pub fn history_len(&self) -> usize {
        self.default.history_len()
    }

    /// Send the stateful history. On success, the assistant's text is
    /// appended to the history.
    pub async fn send(&self, tools: Option<&[ToolSpec]>) -> Result<LlmResponse, NavigationError> {
        let provider = Arc::clone(&self.default);
        let tools = self.effective_tools(&provider, tools);

        let response = match provider.send(tools).await {
            Err(e) if e.is_rate_limit() => {
                warn!("Provider '{}' rate limited, retrying once: {e}", provider.name());
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                provider.send(tools).await?
            }
            other => other?,
        };

        if !response.content.is_empty() {
            provider.push_message(ChatMessage::assistant(response.content.clone()));
        }
        Ok(response)
    }

    /// Stream the stateful history. The caller is responsible for appending
    /// the accumulated assistant text via [`Orchestrator::add_assistant_message`].
    pub async fn stream(&self, tools: Option<&[ToolSpec]>) -> Result<ChunkStream, NavigationError> {
        let provider = Arc::clone(&self.default);
        let tools = self.effective_tools(&provider, tools);

        match provider.stream(tools).await {
            Err(e) if e.is_rate_limit() => {
                warn!("Provider '{}' rate limited, retrying once: {e}", provider.name());
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                provider.stream(tools).await
            }
            other => other,
        }
    }

    /// Stateless one-shot against the given mode's provider.
    pub async fn send_with_mode(
        &self,
        mode: LlmMode,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        let provider = Arc::clone(self.provider_for(mode));
        let tools = self.effective_tools(&provider, tools);
        self.check_images(&provider, messages);
        debug!(mode = ?mode, provider = provider.name(), "one-shot LLM request");

        match provider.send_once(messages, tools).await {
            Err(e) if e.is_rate_limit() => {
                warn!("Provider '{}' rate limited, retrying once: {e}", provider.name());
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                provider.send_once(messages, tools).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn fast_and_vision_fall_back_to_default() {
        let provider = Arc::new(ScriptedProvider::always("ok"));
        let orchestrator = Orchestrator::single(provider.clone());

        orchestrator
            .send_with_mode(LlmMode::Fast, &[ChatMessage::user("hi")], None)
            .await
            .unwrap();
        orchestrator
            .send_with_mode(LlmMode::Vision, &[ChatMessage::user("hi")], None)
            .await
            .unwrap();

        assert_eq!(provider.once_calls(), 2);
    }

    #[tokio::test]
    async fn rate_limit_triggers_single_delayed_retry() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(NavigationError::Provider("rate limit exceeded".into())),
            Ok(LlmResponse::text("recovered")),
        ]));
        let orchestrator = Orchestrator::single(provider.clone());

        let start = Instant::now();
        let response = orchestrator
            .send_with_mode(LlmMode::Fast, &[ChatMessage::user("hi")], None)
            .await
            .unwrap();

        assert_eq!(response.content, "recovered");
        assert_eq!(provider.once_calls(), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn non_rate_limit_errors_do_not_retry() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            NavigationError::Provider("boom".into()),
        )]));
        let orchestrator = Orchestrator::single(provider.clone());

        let result = orchestrator
            .send_with_mode(LlmMode::Fast, &[ChatMessage::user("hi")], None)
            .await;

        assert!(result.is_err());
        assert_eq!(provider.once_calls(), 1);
    }

    #[tokio::test]
    async fn send_appends_assistant_reply_to_history() {
        let provider = Arc::new(ScriptedProvider::always("answer"));
        let orchestrator = Orchestrator::single(provider.clone());

        orchestrator.add_user_message("question");
        assert_eq!(orchestrator.history_len(), 1);

        orchestrator.send(None).await.unwrap();
        assert_eq!(orchestrator.history_len(), 2);

        let pushed = provider.pushed_messages();
        assert_eq!(pushed.last().unwrap().role, ChatRole::Assistant);
        assert_eq!(pushed.last().unwrap().flat_text(), "answer");
    }

    #[tokio::test]
    async fn tool_result_lands_as_user_role_message() {
        let provider = Arc::new(ScriptedProvider::always("ok"));
        let orchestrator = Orchestrator::single(provider.clone());

        orchestrator.add_tool_result("toolu_123", "result body");

        let pushed = provider.pushed_messages();
        assert_eq!(pushed[0].role, ChatRole::User);
        assert!(matches!(
            &pushed[0].parts[0],
            ContentPart::ToolResult { tool_use_id, .. } if tool_use_id == "toolu_123"
        ));
    }

    #[tokio::test]
    async fn tools_are_dropped_for_non_tool_providers() {
        let provider = Arc::new(ScriptedProvider::always("ok").without_tools());
        let orchestrator = Orchestrator::single(provider.clone());

        let tools = vec![ToolSpec {
            name: "navigate_to".into(),
            description: "".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        orchestrator
            .send_with_mode(LlmMode::Default, &[ChatMessage::user("hi")], Some(&tools))
            .await
            .unwrap();

        assert!(provider.last_tools_seen().is_none());
    }

    #[tokio::test]
    async fn clear_history_resets_the_default_provider() {
        let provider = Arc::new(ScriptedProvider::always("ok"));
        let orchestrator = Orchestrator::single(provider.clone());

        orchestrator.add_user_message("one");
        orchestrator.add_assistant_message("two");
        orchestrator.clear_history();
        assert_eq!(orchestrator.history_len(), 0);
    }
}
