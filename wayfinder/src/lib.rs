//! GUI navigation brain.
//!
//! Wayfinder learns how to get around a desktop: it identifies the screen
//! in front of it as a content-addressed node, asks a vision model for an
//! action sequence when it has never made a given trip before, executes
//! the actions with per-step verification, and persists what worked as an
//! edge in a navigation graph. The next time the same trip is requested
//! the stored path replays without a model call.
//!
//! The crate is backend-agnostic: screen capture, OCR, input injection,
//! and LLM providers all sit behind traits and are injected at
//! construction time.

pub mod actions;
pub mod brain;
pub mod config;
pub mod element;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod hash;
pub mod input;
pub mod llm;
pub mod perception;
pub mod shadow;
pub mod tools;
pub mod vlm;

pub use actions::{Action, ActionData, KeyModifier, MouseButton, ScrollDirection};
pub use brain::{Brain, NavigationOutcome};
pub use config::{BrainConfig, LlmConfig, ProviderConfig, ProviderKind};
pub use element::{Bounds, ElementKind, UIElement};
pub use errors::NavigationError;
pub use graph::{
    GraphStats, GraphStore, NavigationGraph, Node, NodeId, Path, PathMetadata, PathOrigin,
    PathValidation, PathVerification,
};
pub use hash::{hash_elements, similarity};
pub use input::InputDriver;
pub use llm::{ChatMessage, LlmMode, LlmProvider, LlmResponse, Orchestrator, ToolSpec};
pub use perception::{OcrAnalysis, OcrElement, OcrEngine, Perception, ScreenSource};
pub use shadow::ShadowDom;
pub use vlm::VlmAdapter;
