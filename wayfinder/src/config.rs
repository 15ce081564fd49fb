//! Injected configuration. The brain never reads environment variables;
//! provider selection and credentials arrive at construction time.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: None,
            model: model.into(),
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Structurally single-mode (only `default`) or multi-mode (`default` plus
/// dedicated `fast` / `vision` providers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub default: ProviderConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast: Option<ProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision: Option<ProviderConfig>,
}

impl LlmConfig {
    pub fn single(default: ProviderConfig) -> Self {
        Self {
            default,
            fast: None,
            vision: None,
        }
    }

    pub fn is_multi_mode(&self) -> bool {
        self.fast.is_some() || self.vision.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct BrainConfig {
    /// Where the navigation graph is persisted.
    pub graph_path: PathBuf,
    /// Populate `Node.screenshot` archival on identification. Roughly 100 KB
    /// of base64 per node when on.
    pub store_screenshots: bool,
    /// Settle after each injected input action.
    pub action_settle: Duration,
    /// Settle between executing an action and verifying the result.
    pub verify_settle: Duration,
    /// Wall-clock budget for a path execution when the path itself does not
    /// carry one.
    pub default_timeout: Duration,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            graph_path: PathBuf::from("data/brain/navigation.json"),
            store_screenshots: false,
            action_settle: Duration::from_millis(200),
            verify_settle: Duration::from_millis(500),
            default_timeout: Duration::from_secs(30),
        }
    }
}
