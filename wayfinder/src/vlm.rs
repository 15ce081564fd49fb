//! The four vision-model contracts: name the program, enumerate UI
//! elements, synthesize a navigation plan, verify a reached state.
//!
//! Models wrap JSON in prose more often than not, so every parser pulls
//! the first balanced `{…}` block out of the reply and falls back to a
//! safe default when nothing usable comes back.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::actions::Action;
use crate::element::UIElement;
use crate::errors::NavigationError;
use crate::llm::{ChatMessage, LlmMode, Orchestrator};
use crate::perception::OcrAnalysis;

/// Input caps per prompt, to keep vision requests bounded.
const MAX_OCR_TEXTS: usize = 20;
const MAX_OCR_ELEMENTS: usize = 50;
const MAX_OCR_SUMMARY: usize = 30;
const MAX_EXPECTED_ELEMENTS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenDescription {
    pub elements: Vec<UIElement>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearnedPlan {
    pub actions: Vec<Action>,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    pub matched: bool,
    pub confidence: f32,
    pub reason: String,
}

/// Extract the first balanced top-level JSON object from free-form model
/// output, tolerating surrounding prose and braces inside string literals.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_block<T: for<'de> Deserialize<'de>>(content: &str) -> Option<T> {
    let block = extract_json_block(content)?;
    match serde_json::from_str(block) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!("Failed to parse VLM JSON block: {e}");
            None
        }
    }
}

pub struct VlmAdapter {
    llm: Arc<Orchestrator>,
}

impl VlmAdapter {
    pub fn new(llm: Arc<Orchestrator>) -> Self {
        Self { llm }
    }

    async fn ask(&self, png: &[u8], prompt: String) -> Result<String, NavigationError> {
        let message = ChatMessage::user_with_png(png, prompt);
        let response = self
            .llm
            .send_with_mode(LlmMode::Vision, &[message], None)
            .await?;
        Ok(response.content)
    }

    /// Name the program on screen. Falls back to `"Unknown"`.
    pub async fn extract_program_name(&self, png: &[u8], ocr_texts: &[String]) -> String {
        let mut prompt = String::from(
            "What program or application is shown in this screenshot? \
             Reply with just the program name, one short word or phrase, nothing else.",
        );
        if !ocr_texts.is_empty() {
            let sample: Vec<&str> = ocr_texts
                .iter()
                .take(MAX_OCR_TEXTS)
                .map(String::as_str)
                .collect();
            prompt.push_str(&format!("\nText visible on screen: {}", sample.join(", ")));
        }

        let content = match self.ask(png, prompt).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Program-name extraction failed: {e}");
                return "Unknown".to_string();
            }
        };

        let name = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
            .trim();

        if name.is_empty() {
            "Unknown".to_string()
        } else {
            name.to_string()
        }
    }

    /// Enumerate interactive UI elements. Falls back to OCR boxes when the
    /// model reply is unusable, and to an empty set when OCR is absent too.
    pub async fn identify_ui_elements(
        &self,
        png: &[u8],
        ocr: Option<&OcrAnalysis>,
    ) -> ScreenDescription {
        #[derive(Deserialize)]
        struct RawScreen {
            #[serde(default)]
            elements: Vec<UIElement>,
            #[serde(default)]
            description: String,
        }

        let mut prompt = String::from(
            "List the UI elements in this screenshot as JSON: \
             {\"elements\":[{\"kind\":\"button|input|text|image|link|menu|other\",\
             \"text\":\"...\",\"bbox\":{\"x\":0,\"y\":0,\"w\":0,\"h\":0},\
             \"confidence\":0.0}],\"description\":\"one sentence about the screen\"}. \
             Coordinates are pixels. Reply with the JSON object only.",
        );
        if let Some(ocr) = ocr {
            let boxes: Vec<Value> = ocr
                .elements
                .iter()
                .take(MAX_OCR_ELEMENTS)
                .map(|e| {
                    serde_json::json!({
                        "text": e.text,
                        "confidence": e.confidence,
                        "bbox": e.bounds,
                    })
                })
                .collect();
            prompt.push_str(&format!(
                "\nOCR already recognized these text boxes: {}",
                Value::Array(boxes)
            ));
        }

        match self.ask(png, prompt).await {
            Ok(content) => {
                if let Some(raw) = parse_block::<RawScreen>(&content) {
                    return ScreenDescription {
                        elements: raw.elements,
                        description: raw.description,
                    };
                }
                self.ocr_fallback(ocr, "VLM reply had no parseable JSON")
            }
            Err(e) => self.ocr_fallback(ocr, &format!("VLM request failed: {e}")),
        }
    }

    fn ocr_fallback(&self, ocr: Option<&OcrAnalysis>, reason: &str) -> ScreenDescription {
        match ocr {
            Some(ocr) if !ocr.elements.is_empty() => {
                debug!("{reason}; synthesizing elements from OCR");
                let elements = ocr
                    .elements
                    .iter()
                    .map(|e| {
                        let mut element =
                            UIElement::text_element(e.text.clone()).with_confidence(e.confidence);
                        if let Some(bounds) = e.bounds {
                            element = element.with_bounds(bounds);
                        }
                        element
                    })
                    .collect();
                ScreenDescription {
                    elements,
                    description: "Synthesized from OCR".to_string(),
                }
            }
            _ => {
                warn!("{reason}; no OCR available either");
                ScreenDescription {
                    elements: Vec::new(),
                    description: "Could not analyze".to_string(),
                }
            }
        }
    }

    /// Ask the model for an action sequence reaching `target`. An empty
    /// plan with zero confidence signals failure; the caller applies the
    /// acceptance threshold.
    pub async fn learn_navigation_path(
        &self,
        png: &[u8],
        target: &str,
        ocr: Option<&OcrAnalysis>,
    ) -> LearnedPlan {
        #[derive(Deserialize)]
        struct RawPlan {
            #[serde(default)]
            actions: Vec<RawPlannedAction>,
            #[serde(default)]
            confidence: f32,
        }

        #[derive(Deserialize)]
        struct RawPlannedAction {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            data: Value,
            #[serde(default)]
            description: Option<String>,
        }

        let mut prompt = format!(
            "You control this computer's mouse and keyboard. Starting from the \
             screen in the screenshot, produce the action sequence that reaches: \
             \"{target}\".\n\
             Reply as JSON: {{\"actions\":[{{\"type\":\"click|type|hotkey|wait|scroll\",\
             \"data\":{{...}},\"description\":\"...\"}}],\"confidence\":0.0}}.\n\
             click data: {{\"x\":0,\"y\":0}} or {{\"text\":\"label to click\"}}. \
             type data: {{\"text\":\"...\",\"pressEnter\":false}}. \
             hotkey data: {{\"keys\":[\"space\"],\"modifiers\":[\"command\"]}}. \
             wait data: {{\"milliseconds\":500}}. \
             scroll data: {{\"amount\":3,\"direction\":\"down\"}}. \
             Reply with the JSON object only.",
        );
        if let Some(ocr) = ocr {
            let texts: Vec<&str> = ocr
                .elements
                .iter()
                .take(MAX_OCR_SUMMARY)
                .map(|e| e.text.as_str())
                .collect();
            if !texts.is_empty() {
                prompt.push_str(&format!("\nText visible on screen: {}", texts.join(", ")));
            }
        }

        let rejected = LearnedPlan {
            actions: Vec::new(),
            confidence: 0.0,
        };

        let content = match self.ask(png, prompt).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Path learning request failed: {e}");
                return rejected;
            }
        };

        let Some(raw) = parse_block::<RawPlan>(&content) else {
            warn!("Path learning reply had no parseable JSON");
            return rejected;
        };

        let mut actions = Vec::new();
        for planned in raw.actions {
            // Fold the tag back into the data object so it deserializes as
            // the tagged ActionData enum.
            let mut object = match planned.data {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    warn!("Skipping planned {} action with non-object data: {other}", planned.kind);
                    continue;
                }
            };
            object.insert("type".to_string(), Value::String(planned.kind.clone()));

            match serde_json::from_value::<crate::actions::ActionData>(Value::Object(object)) {
                Ok(data) => {
                    let mut action = Action::new(data).with_retry();
                    action.description = planned.description;
                    actions.push(action);
                }
                Err(e) => warn!("Skipping unparseable {} action: {e}", planned.kind),
            }
        }

        LearnedPlan {
            actions,
            confidence: raw.confidence.clamp(0.0, 1.0),
        }
    }

    /// Judge whether the current screen matches the expected state.
    pub async fn verify_screen_state(
        &self,
        png: &[u8],
        expected_elements: &[UIElement],
        expected_texts: &[String],
    ) -> VerifyOutcome {
        #[derive(Deserialize)]
        struct RawVerify {
            #[serde(rename = "match", default)]
            matched: bool,
            #[serde(default)]
            confidence: f32,
            #[serde(default)]
            reason: String,
        }

        let expected: Vec<Value> = expected_elements
            .iter()
            .take(MAX_EXPECTED_ELEMENTS)
            .map(|e| serde_json::json!({ "kind": e.kind, "text": e.text }))
            .collect();

        let mut prompt = format!(
            "Does this screenshot show a screen containing these UI elements: {}?",
            Value::Array(expected)
        );
        if !expected_texts.is_empty() {
            prompt.push_str(&format!(
                " It should also show the text: {}.",
                expected_texts.join(", ")
            ));
        }
        prompt.push_str(
            " Reply as JSON: {\"match\":true,\"confidence\":0.0,\"reason\":\"...\"}. \
             Reply with the JSON object only.",
        );

        let failed = VerifyOutcome {
            matched: false,
            confidence: 0.0,
            reason: "Failed to verify".to_string(),
        };

        match self.ask(png, prompt).await {
            Ok(content) => match parse_block::<RawVerify>(&content) {
                Some(raw) => VerifyOutcome {
                    matched: raw.matched,
                    confidence: raw.confidence.clamp(0.0, 1.0),
                    reason: raw.reason,
                },
                None => failed,
            },
            Err(e) => {
                warn!("Screen verification request failed: {e}");
                failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_block_is_extracted_from_prose() {
        let text = "Sure! Here is the result:\n```json\n{\"match\": true, \"confidence\": 0.9, \"reason\": \"ok\"}\n```\nLet me know.";
        let block = extract_json_block(text).unwrap();
        let value: Value = serde_json::from_str(block).unwrap();
        assert_eq!(value["match"], true);
    }

    #[test]
    fn json_block_handles_nested_objects_and_braces_in_strings() {
        let text = r#"prefix {"a": {"b": "closing } brace"}, "c": 1} suffix"#;
        let block = extract_json_block(text).unwrap();
        assert_eq!(block, r#"{"a": {"b": "closing } brace"}, "c": 1}"#);
    }

    #[test]
    fn json_block_absent_returns_none() {
        assert!(extract_json_block("no json here").is_none());
        assert!(extract_json_block("{unclosed").is_none());
    }
}
