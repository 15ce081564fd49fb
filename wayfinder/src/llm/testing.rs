//! Scripted provider used by the in-crate test suites.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::NavigationError;

use super::provider::{ChunkStream, LlmProvider};
use super::types::{ChatMessage, LlmResponse, ToolSpec};

pub(crate) struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<LlmResponse, NavigationError>>>,
    fallback: Option<LlmResponse>,
    pushed: Mutex<Vec<ChatMessage>>,
    once_calls: AtomicUsize,
    last_tools: Mutex<Option<Vec<ToolSpec>>>,
    supports_tools: bool,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<LlmResponse, NavigationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            fallback: None,
            pushed: Mutex::new(Vec::new()),
            once_calls: AtomicUsize::new(0),
            last_tools: Mutex::new(None),
            supports_tools: true,
        }
    }

    /// Provider that answers every request with the same text.
    pub fn always(text: &str) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.fallback = Some(LlmResponse::text(text));
        provider
    }

    pub fn without_tools(mut self) -> Self {
        self.supports_tools = false;
        self
    }

    pub fn once_calls(&self) -> usize {
        self.once_calls.load(Ordering::SeqCst)
    }

    pub fn pushed_messages(&self) -> Vec<ChatMessage> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn last_tools_seen(&self) -> Option<Vec<ToolSpec>> {
        self.last_tools.lock().unwrap().clone()
    }

    fn next_response(&self) -> Result<LlmResponse, NavigationError> {
        if let Some(scripted) = self.responses.lock().unwrap().pop_front() {
            return scripted;
        }
        match &self.fallback {
            Some(response) => Ok(response.clone()),
            None => Err(NavigationError::Provider("script exhausted".into())),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports_tools(&self) -> bool {
        self.supports_tools
    }

    fn push_message(&self, message: ChatMessage) {
        self.pushed.lock().unwrap().push(message);
    }

    fn clear_history(&self) {
        self.pushed.lock().unwrap().clear();
    }

    fn history_len(&self) -> usize {
        self.pushed.lock().unwrap().len()
    }

    async fn send(&self, tools: Option<&[ToolSpec]>) -> Result<LlmResponse, NavigationError> {
        *self.last_tools.lock().unwrap() = tools.map(|t| t.to_vec());
        self.next_response()
    }

    async fn send_once(
        &self,
        _messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        self.once_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_tools.lock().unwrap() = tools.map(|t| t.to_vec());
        self.next_response()
    }

    async fn stream(&self, tools: Option<&[ToolSpec]>) -> Result<ChunkStream, NavigationError> {
        *self.last_tools.lock().unwrap() = tools.map(|t| t.to_vec());
        let response = self.next_response()?;
        let chunk = super::types::StreamChunk {
            delta: response.content,
            stop_reason: Some(response.stop_reason),
        };
        Ok(Box::pin(futures::stream::iter(vec![Ok(chunk)])))
    }
}
