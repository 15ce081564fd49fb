//! Shared fakes for the scenario tests: a static screen, a configurable
//! OCR engine, a recording input driver, and a scripted vision model that
//! answers the brain's four prompt contracts.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wayfinder::actions::{MouseButton, ScrollDirection};
use wayfinder::errors::NavigationError;
use wayfinder::llm::{ChatMessage, ChunkStream, LlmProvider, LlmResponse, ToolSpec};
use wayfinder::perception::{OcrAnalysis, OcrElement, OcrEngine, ScreenSource};
use wayfinder::{Bounds, UIElement};

pub struct FakeScreen;

#[async_trait]
impl ScreenSource for FakeScreen {
    async fn capture_png(&self) -> Result<Vec<u8>, NavigationError> {
        Ok(vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3])
    }

    fn screen_size(&self) -> Result<(u32, u32), NavigationError> {
        Ok((1920, 1080))
    }
}

#[derive(Default)]
pub struct FakeOcr {
    elements: Mutex<Vec<OcrElement>>,
}

impl FakeOcr {
    pub fn new(elements: Vec<OcrElement>) -> Self {
        Self {
            elements: Mutex::new(elements),
        }
    }

    pub fn set_texts(&self, texts: &[&str]) {
        let elements = texts
            .iter()
            .enumerate()
            .map(|(index, text)| OcrElement {
                text: text.to_string(),
                confidence: 0.9,
                bounds: Some(Bounds::new(50.0, 40.0 * index as f64 + 40.0, 120.0, 20.0)),
            })
            .collect();
        *self.elements.lock().unwrap() = elements;
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn analyze(&self, _png: &[u8]) -> Result<Option<OcrAnalysis>, NavigationError> {
        let elements = self.elements.lock().unwrap().clone();
        let full_text = elements
            .iter()
            .map(|e| e.text.clone())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(OcrAnalysis {
            full_text,
            elements,
            platform: "fake".to_string(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Typed(String, u64),
    KeyDown(String),
    KeyUp(String),
    Click(f64, f64, MouseButton, bool),
    Scroll(i32),
}

#[derive(Default)]
pub struct RecordingInput {
    events: Mutex<Vec<InputEvent>>,
    /// Number of upcoming click calls that should fail.
    fail_clicks: AtomicUsize,
}

impl RecordingInput {
    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn fail_next_clicks(&self, count: usize) {
        self.fail_clicks.store(count, Ordering::SeqCst);
    }

    fn log(&self, event: InputEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl wayfinder::InputDriver for RecordingInput {
    async fn type_text(&self, text: &str, delay_ms: u64) -> Result<(), NavigationError> {
        self.log(InputEvent::Typed(text.to_string(), delay_ms));
        Ok(())
    }

    async fn key_down(&self, key: &str) -> Result<(), NavigationError> {
        self.log(InputEvent::KeyDown(key.to_string()));
        Ok(())
    }

    async fn key_up(&self, key: &str) -> Result<(), NavigationError> {
        self.log(InputEvent::KeyUp(key.to_string()));
        Ok(())
    }

    async fn click_at(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        double_click: bool,
    ) -> Result<(), NavigationError> {
        if self
            .fail_clicks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(NavigationError::Input("injected click failure".to_string()));
        }
        self.log(InputEvent::Click(x, y, button, double_click));
        Ok(())
    }

    async fn scroll(
        &self,
        amount: i32,
        _direction: ScrollDirection,
    ) -> Result<(), NavigationError> {
        self.log(InputEvent::Scroll(amount));
        Ok(())
    }
}

/// Scripted vision model. It recognizes the brain's four prompts by their
/// wording and answers from its configurable screen state, counting calls
/// per contract.
pub struct FakeVision {
    program: Mutex<String>,
    elements: Mutex<Vec<UIElement>>,
    plan_json: Mutex<String>,
    verify_json: Mutex<String>,
    pub program_calls: AtomicUsize,
    pub identify_calls: AtomicUsize,
    pub learn_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
}

impl FakeVision {
    pub fn new(program: &str) -> Self {
        Self {
            program: Mutex::new(program.to_string()),
            elements: Mutex::new(vec![
                UIElement::text_element("File").with_bounds(Bounds::new(10.0, 10.0, 40.0, 20.0)),
                UIElement::text_element("Edit").with_bounds(Bounds::new(60.0, 10.0, 40.0, 20.0)),
            ]),
            plan_json: Mutex::new(String::from(
                r#"{"actions":[{"type":"click","data":{"x":400.0,"y":300.0},"description":"Open the target"}],"confidence":0.9}"#,
            )),
            verify_json: Mutex::new(String::from(
                r#"{"match":true,"confidence":0.9,"reason":"looks right"}"#,
            )),
            program_calls: AtomicUsize::new(0),
            identify_calls: AtomicUsize::new(0),
            learn_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    /// Reconfigure what the "screen" shows; subsequent identifications see
    /// this program and element set.
    pub fn show_screen(&self, program: &str, element_texts: &[&str]) {
        *self.program.lock().unwrap() = program.to_string();
        *self.elements.lock().unwrap() = element_texts
            .iter()
            .enumerate()
            .map(|(index, text)| {
                UIElement::text_element(*text)
                    .with_bounds(Bounds::new(10.0, 30.0 * index as f64 + 10.0, 100.0, 20.0))
            })
            .collect();
    }

    pub fn set_plan_json(&self, json: &str) {
        *self.plan_json.lock().unwrap() = json.to_string();
    }

    pub fn set_verify_json(&self, json: &str) {
        *self.verify_json.lock().unwrap() = json.to_string();
    }

    fn reply(&self, prompt: &str) -> String {
        if prompt.contains("What program or application") {
            self.program_calls.fetch_add(1, Ordering::SeqCst);
            format!("\"{}\"", self.program.lock().unwrap())
        } else if prompt.contains("List the UI elements") {
            self.identify_calls.fetch_add(1, Ordering::SeqCst);
            let elements = self.elements.lock().unwrap().clone();
            let body = serde_json::json!({
                "elements": elements,
                "description": format!("{} main screen", self.program.lock().unwrap()),
            });
            format!("Here you go:\n{body}")
        } else if prompt.contains("produce the action sequence") {
            self.learn_calls.fetch_add(1, Ordering::SeqCst);
            self.plan_json.lock().unwrap().clone()
        } else if prompt.contains("Does this screenshot show") {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            self.verify_json.lock().unwrap().clone()
        } else {
            String::from("I don't understand the request.")
        }
    }
}

#[async_trait]
impl LlmProvider for FakeVision {
    fn name(&self) -> &'static str {
        "fake-vision"
    }

    fn push_message(&self, _message: ChatMessage) {}

    fn clear_history(&self) {}

    fn history_len(&self) -> usize {
        0
    }

    async fn send(&self, _tools: Option<&[ToolSpec]>) -> Result<LlmResponse, NavigationError> {
        Ok(LlmResponse::text("ok"))
    }

    async fn send_once(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        let prompt = messages
            .iter()
            .map(ChatMessage::flat_text)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(LlmResponse::text(self.reply(&prompt)))
    }

    async fn stream(&self, _tools: Option<&[ToolSpec]>) -> Result<ChunkStream, NavigationError> {
        Err(NavigationError::Provider("streaming not scripted".into()))
    }
}

/// A provider that fails with the given errors before succeeding, used for
/// throttling behavior tests.
pub struct FlakyProvider {
    errors: Mutex<Vec<NavigationError>>,
    pub calls: AtomicUsize,
}

impl FlakyProvider {
    pub fn new(errors: Vec<NavigationError>) -> Self {
        Self {
            errors: Mutex::new(errors),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for FlakyProvider {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn push_message(&self, _message: ChatMessage) {}

    fn clear_history(&self) {}

    fn history_len(&self) -> usize {
        0
    }

    async fn send(&self, _tools: Option<&[ToolSpec]>) -> Result<LlmResponse, NavigationError> {
        self.send_once(&[], None).await
    }

    async fn send_once(
        &self,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse, NavigationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut errors = self.errors.lock().unwrap();
        if errors.is_empty() {
            Ok(LlmResponse::text("recovered"))
        } else {
            Err(errors.remove(0))
        }
    }

    async fn stream(&self, _tools: Option<&[ToolSpec]>) -> Result<ChunkStream, NavigationError> {
        Err(NavigationError::Provider("no stream".into()))
    }
}
