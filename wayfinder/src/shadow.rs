//! Volatile snapshot of the current screen, bound to a node identity. At
//! most one exists inside the brain at a time; every identification and
//! every executed action replaces it.

use base64::Engine as _;
use chrono::{DateTime, Utc};

use crate::element::UIElement;
use crate::graph::NodeId;
use crate::hash::hash_elements;
use crate::perception::{OcrAnalysis, Perception};
use crate::vlm::VlmAdapter;

#[derive(Debug, Clone)]
pub struct ShadowDom {
    pub node_id: NodeId,
    pub captured_at: DateTime<Utc>,
    /// Base64-encoded PNG of the capture this snapshot was built from.
    pub screenshot: String,
    pub ui_elements: Vec<UIElement>,
    pub ocr: Option<OcrAnalysis>,
    pub vlm_description: Option<String>,
    /// Hash of the live element set. Same algorithm as the node's state
    /// hash; may differ from it when runtime positions cross a
    /// quantization boundary.
    pub instance_hash: String,
}

impl ShadowDom {
    /// Assemble a snapshot from pieces an identification pass already
    /// computed, avoiding a second round-trip to the vision model.
    pub fn from_parts(
        node_id: NodeId,
        png: &[u8],
        ocr: Option<OcrAnalysis>,
        ui_elements: Vec<UIElement>,
        vlm_description: Option<String>,
    ) -> Self {
        let instance_hash = hash_elements(&ui_elements);
        Self {
            node_id,
            captured_at: Utc::now(),
            screenshot: base64::engine::general_purpose::STANDARD.encode(png),
            ui_elements,
            ocr,
            vlm_description,
            instance_hash,
        }
    }

    /// Build a snapshot from an already-captured frame: OCR best-effort,
    /// elements via the vision model, hash over the result.
    pub async fn from_capture(
        perception: &Perception,
        vlm: &VlmAdapter,
        node_id: NodeId,
        png: &[u8],
    ) -> Self {
        let ocr = perception.analyze(png).await;
        let screen = vlm.identify_ui_elements(png, ocr.as_ref()).await;
        let instance_hash = hash_elements(&screen.elements);

        Self {
            node_id,
            captured_at: Utc::now(),
            screenshot: base64::engine::general_purpose::STANDARD.encode(png),
            ui_elements: screen.elements,
            ocr,
            vlm_description: Some(screen.description),
            instance_hash,
        }
    }

    /// Case-insensitive substring search over the snapshot's OCR elements.
    pub fn contains_text(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.ocr
            .as_ref()
            .map(|ocr| {
                ocr.elements
                    .iter()
                    .any(|element| element.text.to_lowercase().contains(&needle))
            })
            .unwrap_or(false)
    }
}
