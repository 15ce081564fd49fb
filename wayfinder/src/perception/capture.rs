//! Primary-monitor capture backed by `xcap`.

use std::io::Cursor;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};

use crate::errors::NavigationError;

use super::ScreenSource;

/// Captures the primary monitor and encodes it as PNG.
pub struct PrimaryMonitorSource;

impl PrimaryMonitorSource {
    pub fn new() -> Self {
        Self
    }

    fn primary_monitor() -> Result<xcap::Monitor, NavigationError> {
        let monitors = xcap::Monitor::all().map_err(|e| {
            NavigationError::CaptureFailed(format!("Failed to enumerate monitors: {e}"))
        })?;

        for monitor in monitors {
            let is_primary = monitor.is_primary().map_err(|e| {
                NavigationError::CaptureFailed(format!("Failed to get monitor primary flag: {e}"))
            })?;
            if is_primary {
                return Ok(monitor);
            }
        }

        Err(NavigationError::CaptureFailed(
            "No primary monitor found".to_string(),
        ))
    }
}

impl Default for PrimaryMonitorSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScreenSource for PrimaryMonitorSource {
    async fn capture_png(&self) -> Result<Vec<u8>, NavigationError> {
        let monitor = Self::primary_monitor()?;
        let rgba = monitor
            .capture_image()
            .map_err(|e| NavigationError::CaptureFailed(format!("Monitor capture failed: {e}")))?;

        let mut png = Vec::new();
        DynamicImage::ImageRgba8(rgba)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| NavigationError::CaptureFailed(format!("PNG encoding failed: {e}")))?;
        Ok(png)
    }

    fn screen_size(&self) -> Result<(u32, u32), NavigationError> {
        let monitor = Self::primary_monitor()?;
        let width = monitor.width().map_err(|e| {
            NavigationError::CaptureFailed(format!("Failed to get monitor width: {e}"))
        })?;
        let height = monitor.height().map_err(|e| {
            NavigationError::CaptureFailed(format!("Failed to get monitor height: {e}"))
        })?;
        Ok((width, height))
    }
}
