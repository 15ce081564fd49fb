//! The seam to the OS input subsystem. Only the action executor talks to
//! this; concrete backends are injected (tests use a recording fake).

use async_trait::async_trait;

use crate::actions::{MouseButton, ScrollDirection};
use crate::errors::NavigationError;

#[async_trait]
pub trait InputDriver: Send + Sync {
    /// Emit characters with the given inter-key delay.
    async fn type_text(&self, text: &str, delay_ms: u64) -> Result<(), NavigationError>;

    async fn key_down(&self, key: &str) -> Result<(), NavigationError>;

    async fn key_up(&self, key: &str) -> Result<(), NavigationError>;

    async fn press_key(&self, key: &str) -> Result<(), NavigationError> {
        self.key_down(key).await?;
        self.key_up(key).await
    }

    async fn press_enter(&self) -> Result<(), NavigationError> {
        self.press_key("enter").await
    }

    async fn press_tab(&self) -> Result<(), NavigationError> {
        self.press_key("tab").await
    }

    async fn press_escape(&self) -> Result<(), NavigationError> {
        self.press_key("escape").await
    }

    async fn click_at(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        double_click: bool,
    ) -> Result<(), NavigationError>;

    /// Scroll `amount` lines in the given direction.
    async fn scroll(&self, amount: i32, direction: ScrollDirection) -> Result<(), NavigationError>;
}
