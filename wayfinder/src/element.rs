//! UI element model shared by perception, hashing, and verification.

use serde::{Deserialize, Serialize};

/// Coarse element category as reported by the vision model or OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Button,
    Input,
    Text,
    Image,
    Link,
    Menu,
    #[default]
    Other,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Button => "button",
            ElementKind::Input => "input",
            ElementKind::Text => "text",
            ElementKind::Image => "image",
            ElementKind::Link => "link",
            ElementKind::Menu => "menu",
            ElementKind::Other => "other",
        }
    }
}

/// Axis-aligned bounding box. Coordinates are screen pixels unless a
/// producer handed us normalized values, which callers must convert via
/// [`Bounds::to_pixels`] before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    #[serde(rename = "w")]
    pub width: f64,
    #[serde(rename = "h")]
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Detection rule for normalized coordinates: all four components in [0, 1].
    pub fn is_normalized(&self) -> bool {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        in_unit(self.x) && in_unit(self.y) && in_unit(self.width) && in_unit(self.height)
    }

    /// Scale a normalized box to pixel coordinates for the given screen size.
    pub fn to_pixels(&self, screen_width: u32, screen_height: u32) -> Bounds {
        Bounds {
            x: self.x * screen_width as f64,
            y: self.y * screen_height as f64,
            width: self.width * screen_width as f64,
            height: self.height * screen_height as f64,
        }
    }
}

/// A single recognized UI element. Positions are screen pixels, not
/// normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIElement {
    #[serde(default)]
    pub kind: ElementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "bbox", default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl UIElement {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            text: None,
            bounds: None,
            confidence: None,
        }
    }

    pub fn text_element(text: impl Into<String>) -> Self {
        Self {
            kind: ElementKind::Text,
            text: Some(text.into()),
            bounds: None,
            confidence: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}
