//! Text recognition backed by `uni-ocr`'s platform provider.

use async_trait::async_trait;
use uni_ocr::{OcrEngine as UniOcrEngine, OcrProvider};

use crate::errors::NavigationError;

use super::{OcrAnalysis, OcrElement, OcrEngine};

/// Uses whichever OCR provider the platform offers. The provider reports
/// recognized text without per-word geometry, so elements carry line texts
/// with no bounds; text-targeted clicks need a backend that reports boxes.
pub struct NativeOcrEngine;

impl NativeOcrEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeOcrEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for NativeOcrEngine {
    async fn analyze(&self, png: &[u8]) -> Result<Option<OcrAnalysis>, NavigationError> {
        let engine = match UniOcrEngine::new(OcrProvider::Auto) {
            Ok(engine) => engine,
            // No provider on this platform; callers continue without OCR.
            Err(_) => return Ok(None),
        };

        let image = image::load_from_memory(png).map_err(|e| {
            NavigationError::PerceptionUnavailable(format!("Invalid PNG for OCR: {e}"))
        })?;

        let (text, _language, confidence) = engine.recognize_image(&image).await.map_err(|e| {
            NavigationError::PerceptionUnavailable(format!("OCR recognition failed: {e}"))
        })?;

        let confidence = confidence.unwrap_or(1.0);
        let elements = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| OcrElement {
                text: line.to_string(),
                confidence,
                bounds: None,
            })
            .collect();

        Ok(Some(OcrAnalysis {
            full_text: text,
            elements,
            platform: std::env::consts::OS.to_string(),
        }))
    }
}
