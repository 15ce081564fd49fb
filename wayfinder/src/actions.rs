//! The closed action vocabulary executed against the OS input subsystem.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Keyboard modifiers. `Command` maps to Control on non-macOS platforms at
/// dispatch time, never in the stored action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyModifier {
    Command,
    Ctrl,
    Alt,
    Shift,
}

fn default_key_delay_ms() -> u64 {
    50
}

/// Tagged action payload. `Click` is either coordinate-based (both `x` and
/// `y` present) or text-based (`text` present), never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionData {
    #[serde(rename_all = "camelCase")]
    Click {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        double_click: bool,
    },
    #[serde(rename_all = "camelCase")]
    Type {
        text: String,
        #[serde(default)]
        press_enter: bool,
        #[serde(rename = "delay_ms", default = "default_key_delay_ms")]
        delay_ms: u64,
    },
    Hotkey {
        /// Single-key form; merged with `keys` at dispatch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        keys: Vec<String>,
        #[serde(default)]
        modifiers: Vec<KeyModifier>,
    },
    Wait {
        milliseconds: u64,
    },
    Scroll {
        amount: i32,
        direction: ScrollDirection,
    },
}

impl ActionData {
    /// Main keys of a hotkey, in press order, whichever of the two wire
    /// forms was used.
    pub fn hotkey_keys(&self) -> Vec<String> {
        match self {
            ActionData::Hotkey { key, keys, .. } => {
                let mut merged = Vec::new();
                if let Some(key) = key {
                    merged.push(key.clone());
                }
                merged.extend(keys.iter().cloned());
                merged
            }
            _ => Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ActionData::Click { .. } => "click",
            ActionData::Type { .. } => "type",
            ActionData::Hotkey { .. } => "hotkey",
            ActionData::Wait { .. } => "wait",
            ActionData::Scroll { .. } => "scroll",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: Uuid,
    pub data: ActionData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub retry_on_failure: bool,
}

impl Action {
    pub fn new(data: ActionData) -> Self {
        Self {
            id: Uuid::new_v4(),
            data,
            description: None,
            retry_on_failure: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_retry(mut self) -> Self {
        self.retry_on_failure = true;
        self
    }

    /// Coordinate click helper.
    pub fn click_at(x: f64, y: f64) -> Self {
        Self::new(ActionData::Click {
            x: Some(x),
            y: Some(y),
            text: None,
            button: MouseButton::Left,
            double_click: false,
        })
    }

    /// Text-targeted click helper; the executor resolves the target via OCR.
    pub fn click_text(text: impl Into<String>) -> Self {
        Self::new(ActionData::Click {
            x: None,
            y: None,
            text: Some(text.into()),
            button: MouseButton::Left,
            double_click: false,
        })
    }

    pub fn type_text(text: impl Into<String>, press_enter: bool) -> Self {
        Self::new(ActionData::Type {
            text: text.into(),
            press_enter,
            delay_ms: default_key_delay_ms(),
        })
    }

    pub fn hotkey(keys: &[&str], modifiers: &[KeyModifier]) -> Self {
        Self::new(ActionData::Hotkey {
            key: None,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            modifiers: modifiers.to_vec(),
        })
    }

    pub fn wait(milliseconds: u64) -> Self {
        Self::new(ActionData::Wait { milliseconds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_data_round_trips_through_tagged_json() {
        let action = Action::click_text("Display").with_retry();
        let json = serde_json::to_string(&action).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(action, back);
        assert!(json.contains("\"type\":\"click\""));
        assert!(json.contains("\"retryOnFailure\":true"));
    }

    #[test]
    fn hotkey_accepts_both_wire_forms() {
        let single: ActionData =
            serde_json::from_str(r#"{"type":"hotkey","key":"q","modifiers":["command"]}"#).unwrap();
        assert_eq!(single.hotkey_keys(), vec!["q".to_string()]);

        let multi: ActionData =
            serde_json::from_str(r#"{"type":"hotkey","keys":["a","b"],"modifiers":["shift"]}"#)
                .unwrap();
        assert_eq!(multi.hotkey_keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn type_defaults_apply() {
        let data: ActionData = serde_json::from_str(r#"{"type":"type","text":"hi"}"#).unwrap();
        match data {
            ActionData::Type {
                press_enter,
                delay_ms,
                ..
            } => {
                assert!(!press_enter);
                assert_eq!(delay_ms, 50);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
