//! The provider seam. Each backend owns its conversation history in its own
//! wire format; the orchestrator speaks only in semantic verbs.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::NavigationError;

use super::types::{ChatMessage, LlmResponse, StreamChunk, ToolSpec};

pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<StreamChunk, NavigationError>> + Send + 'static>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports_tools(&self) -> bool {
        true
    }

    fn supports_images(&self) -> bool {
        true
    }

    /// Append one message to this provider's stateful history, converting
    /// to the native shape at insertion time.
    fn push_message(&self, message: ChatMessage);

    fn clear_history(&self);

    fn history_len(&self) -> usize;

    /// Send the accumulated history. The caller appends the assistant reply
    /// to history after a successful send.
    async fn send(&self, tools: Option<&[ToolSpec]>) -> Result<LlmResponse, NavigationError>;

    /// One-shot stateless completion; the stored history is not consulted
    /// and not modified.
    async fn send_once(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError>;

    /// Stream the accumulated history. History discipline is the caller's
    /// job, as with [`LlmProvider::send`].
    async fn stream(&self, tools: Option<&[ToolSpec]>) -> Result<ChunkStream, NavigationError>;
}
