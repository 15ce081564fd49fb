//! Deterministic dispatcher for the action vocabulary. Text-targeted
//! clicks are resolved through OCR at dispatch time; every injected input
//! is followed by a short settle so the UI can react.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::actions::{Action, ActionData, KeyModifier, MouseButton};
use crate::element::Bounds;
use crate::errors::NavigationError;
use crate::input::InputDriver;
use crate::perception::Perception;

/// Settle after a hotkey's modifiers go down.
const MODIFIER_SETTLE: Duration = Duration::from_millis(50);
/// Gap between main keys of a hotkey chord.
const KEY_GAP: Duration = Duration::from_millis(20);
/// Settle before the modifiers are released again.
const RELEASE_SETTLE: Duration = Duration::from_millis(10);
/// Pause between typing text and pressing Enter.
const ENTER_DELAY: Duration = Duration::from_millis(100);

/// Platform mapping for stored modifiers: `command` degrades to Control
/// away from macOS.
fn modifier_key_name(modifier: KeyModifier, is_macos: bool) -> &'static str {
    match modifier {
        KeyModifier::Command => {
            if is_macos {
                "command"
            } else {
                "control"
            }
        }
        KeyModifier::Ctrl => "control",
        KeyModifier::Alt => "alt",
        KeyModifier::Shift => "shift",
    }
}

pub struct ActionExecutor {
    input: Arc<dyn InputDriver>,
    perception: Arc<Perception>,
    settle: Duration,
}

impl ActionExecutor {
    pub fn new(input: Arc<dyn InputDriver>, perception: Arc<Perception>, settle: Duration) -> Self {
        Self {
            input,
            perception,
            settle,
        }
    }

    /// Execute one action. Failures collapse to `false` with a log line;
    /// the caller decides whether to retry.
    pub async fn execute(&self, action: &Action) -> bool {
        debug!(kind = action.data.kind(), id = %action.id, "executing action");
        match self.dispatch(&action.data).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Action {} ({}) failed: {e}", action.id, action.data.kind());
                false
            }
        }
    }

    async fn dispatch(&self, data: &ActionData) -> Result<(), NavigationError> {
        match data {
            ActionData::Click {
                x,
                y,
                text,
                button,
                double_click,
            } => match (x, y, text) {
                (Some(x), Some(y), None) => {
                    self.input.click_at(*x, *y, *button, *double_click).await?;
                    sleep(self.settle).await;
                    Ok(())
                }
                (None, None, Some(text)) => {
                    let bounds = self.resolve_text_target(text).await?;
                    self.click_bbox_center(bounds, *button, *double_click).await
                }
                _ => Err(NavigationError::InvalidArgument(
                    "Click requires either both coordinates or a text target, not both".to_string(),
                )),
            },
            ActionData::Type {
                text,
                press_enter,
                delay_ms,
            } => {
                self.input.type_text(text, *delay_ms).await?;
                if *press_enter {
                    sleep(ENTER_DELAY).await;
                    self.input.press_enter().await?;
                }
                sleep(self.settle).await;
                Ok(())
            }
            ActionData::Hotkey { modifiers, .. } => {
                let keys = data.hotkey_keys();
                if keys.is_empty() {
                    return Err(NavigationError::InvalidArgument(
                        "Hotkey without any main key".to_string(),
                    ));
                }

                let is_macos = cfg!(target_os = "macos");
                for modifier in modifiers {
                    self.input
                        .key_down(modifier_key_name(*modifier, is_macos))
                        .await?;
                }
                sleep(MODIFIER_SETTLE).await;

                for key in &keys {
                    self.input.press_key(key).await?;
                    sleep(KEY_GAP).await;
                }
                sleep(RELEASE_SETTLE).await;

                for modifier in modifiers {
                    self.input
                        .key_up(modifier_key_name(*modifier, is_macos))
                        .await?;
                }
                Ok(())
            }
            ActionData::Wait { milliseconds } => {
                sleep(Duration::from_millis(*milliseconds)).await;
                Ok(())
            }
            ActionData::Scroll { amount, direction } => {
                self.input.scroll(*amount, *direction).await
            }
        }
    }

    /// Click the center of a bounding box, converting normalized
    /// coordinates to pixels first.
    pub async fn click_bbox_center(
        &self,
        bounds: Bounds,
        button: MouseButton,
        double_click: bool,
    ) -> Result<(), NavigationError> {
        let pixel = self.perception.pixel_bounds(bounds);
        let (x, y) = pixel.center();
        self.input.click_at(x, y, button, double_click).await?;
        sleep(self.settle).await;
        Ok(())
    }

    /// Resolve a text-targeted click via OCR: case-insensitive substring
    /// match, highest confidence wins, topmost-leftmost breaks ties.
    async fn resolve_text_target(&self, query: &str) -> Result<Bounds, NavigationError> {
        let png = self.perception.capture().await?;
        let analysis = self.perception.analyze(&png).await.ok_or_else(|| {
            NavigationError::ActionFailed(format!(
                "OCR unavailable, cannot resolve click target '{query}'"
            ))
        })?;

        let needle = query.to_lowercase();
        let mut best: Option<(&str, f32, Bounds)> = None;
        for element in &analysis.elements {
            let Some(bounds) = element.bounds else {
                continue;
            };
            if !element.text.to_lowercase().contains(&needle) {
                continue;
            }
            let candidate = (element.text.as_str(), element.confidence, bounds);
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.1 > current.1
                        || (candidate.1 == current.1
                            && (candidate.2.y, candidate.2.x) < (current.2.y, current.2.x))
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }

        match best {
            Some((text, confidence, bounds)) => {
                debug!("Resolved click target '{query}' to '{text}' (confidence {confidence})");
                Ok(bounds)
            }
            None => Err(NavigationError::ActionFailed(format!(
                "No OCR element matching '{query}' on screen"
            ))),
        }
    }
}
