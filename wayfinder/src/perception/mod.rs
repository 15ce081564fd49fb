//! Screen capture and text recognition.
//!
//! The brain consumes two interfaces here: a [`ScreenSource`] that yields
//! PNG bytes of the primary display, and an [`OcrEngine`] that turns those
//! bytes into recognized text boxes. Concrete OS backends live behind the
//! `screen-capture` and `ocr-native` features; tests inject fakes.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::element::Bounds;
use crate::errors::NavigationError;

#[cfg(feature = "screen-capture")]
mod capture;
#[cfg(feature = "ocr-native")]
mod ocr;

#[cfg(feature = "screen-capture")]
pub use capture::PrimaryMonitorSource;
#[cfg(feature = "ocr-native")]
pub use ocr::NativeOcrEngine;

/// One recognized text box. `bounds` is in screen pixels once it leaves
/// this module; backends that report normalized coordinates are converted
/// during analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrElement {
    pub text: String,
    pub confidence: f32,
    #[serde(rename = "bbox", default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrAnalysis {
    pub full_text: String,
    pub elements: Vec<OcrElement>,
    pub platform: String,
}

/// Produces PNG bytes for the primary display.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    async fn capture_png(&self) -> Result<Vec<u8>, NavigationError>;

    /// Primary display size in pixels.
    fn screen_size(&self) -> Result<(u32, u32), NavigationError>;
}

/// Text recognition backend. `Ok(None)` means the backend is not available
/// on this platform; callers continue without OCR.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn analyze(&self, png: &[u8]) -> Result<Option<OcrAnalysis>, NavigationError>;
}

/// Bundles capture and OCR behind one object and owns the cached screen
/// size used for normalized-coordinate conversion. The cache is filled on
/// first use and never invalidated; a display-resolution change requires a
/// process restart.
pub struct Perception {
    source: Arc<dyn ScreenSource>,
    ocr: Option<Arc<dyn OcrEngine>>,
    screen_size: OnceCell<(u32, u32)>,
}

/// Fallback dimensions when the source cannot report a size. Conversion
/// still produces in-bounds coordinates for the common case.
const FALLBACK_SCREEN_SIZE: (u32, u32) = (1920, 1080);

impl Perception {
    pub fn new(source: Arc<dyn ScreenSource>, ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        Self {
            source,
            ocr,
            screen_size: OnceCell::new(),
        }
    }

    /// Capture the primary display. Errors here are fatal for the current
    /// identification attempt.
    pub async fn capture(&self) -> Result<Vec<u8>, NavigationError> {
        self.source.capture_png().await
    }

    /// Best-effort OCR. Backend errors and backend absence both collapse to
    /// `None`; the caller proceeds with no text boxes.
    pub async fn analyze(&self, png: &[u8]) -> Option<OcrAnalysis> {
        let ocr = self.ocr.as_ref()?;
        match ocr.analyze(png).await {
            Ok(Some(mut analysis)) => {
                let (width, height) = self.screen_size();
                for element in &mut analysis.elements {
                    if let Some(bounds) = element.bounds {
                        element.bounds = Some(self.pixel_bounds_with(bounds, width, height));
                    }
                }
                Some(analysis)
            }
            Ok(None) => {
                debug!("OCR backend reported unavailable");
                None
            }
            Err(e) => {
                warn!("OCR analysis failed, continuing without text boxes: {e}");
                None
            }
        }
    }

    /// Cached primary display size.
    pub fn screen_size(&self) -> (u32, u32) {
        *self.screen_size.get_or_init(|| match self.source.screen_size() {
            Ok(size) => size,
            Err(e) => {
                warn!(
                    "Failed to read screen size, assuming {}x{}: {e}",
                    FALLBACK_SCREEN_SIZE.0, FALLBACK_SCREEN_SIZE.1
                );
                FALLBACK_SCREEN_SIZE
            }
        })
    }

    /// Coordinate guard: boxes whose four components all lie in [0, 1] are
    /// treated as normalized and scaled to the cached screen size.
    pub fn pixel_bounds(&self, bounds: Bounds) -> Bounds {
        let (width, height) = self.screen_size();
        self.pixel_bounds_with(bounds, width, height)
    }

    fn pixel_bounds_with(&self, bounds: Bounds, width: u32, height: u32) -> Bounds {
        if bounds.is_normalized() {
            bounds.to_pixels(width, height)
        } else {
            bounds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource;

    #[async_trait]
    impl ScreenSource for StaticSource {
        async fn capture_png(&self) -> Result<Vec<u8>, NavigationError> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }

        fn screen_size(&self) -> Result<(u32, u32), NavigationError> {
            Ok((1600, 900))
        }
    }

    struct NormalizedOcr;

    #[async_trait]
    impl OcrEngine for NormalizedOcr {
        async fn analyze(&self, _png: &[u8]) -> Result<Option<OcrAnalysis>, NavigationError> {
            Ok(Some(OcrAnalysis {
                full_text: "Save".to_string(),
                elements: vec![OcrElement {
                    text: "Save".to_string(),
                    confidence: 0.9,
                    bounds: Some(Bounds::new(0.5, 0.5, 0.1, 0.05)),
                }],
                platform: "fake".to_string(),
            }))
        }
    }

    struct FailingOcr;

    #[async_trait]
    impl OcrEngine for FailingOcr {
        async fn analyze(&self, _png: &[u8]) -> Result<Option<OcrAnalysis>, NavigationError> {
            Err(NavigationError::PerceptionUnavailable("no backend".into()))
        }
    }

    #[tokio::test]
    async fn normalized_ocr_boxes_are_converted_to_pixels() {
        let perception = Perception::new(Arc::new(StaticSource), Some(Arc::new(NormalizedOcr)));
        let png = perception.capture().await.unwrap();
        let analysis = perception.analyze(&png).await.unwrap();
        let bounds = analysis.elements[0].bounds.unwrap();
        assert_eq!(bounds.x, 800.0);
        assert_eq!(bounds.y, 450.0);
        assert_eq!(bounds.width, 160.0);
        assert_eq!(bounds.height, 45.0);
    }

    #[tokio::test]
    async fn ocr_errors_are_non_fatal() {
        let perception = Perception::new(Arc::new(StaticSource), Some(Arc::new(FailingOcr)));
        assert!(perception.analyze(b"png").await.is_none());
    }

    #[tokio::test]
    async fn missing_ocr_backend_yields_none() {
        let perception = Perception::new(Arc::new(StaticSource), None);
        assert!(perception.analyze(b"png").await.is_none());
    }

    #[test]
    fn pixel_guard_leaves_pixel_boxes_alone() {
        let perception = Perception::new(Arc::new(StaticSource), None);
        let pixel = Bounds::new(100.0, 200.0, 50.0, 20.0);
        assert_eq!(perception.pixel_bounds(pixel), pixel);
    }
}
