use serde::{Deserialize, Serialize};

use crate::{config::ClipConfig, FramestepError, Result};

/// Page viewport in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// Rectangle in page coordinates (CSS pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn from_viewport(viewport: Viewport) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: viewport.width as f64,
            height: viewport.height as f64,
        }
    }
}

impl ClipConfig {
    /// Resolve the captured region inside `bounds`, which is either the
    /// selected element's box or the whole viewport.
    pub fn resolve(&self, bounds: Region) -> Result<Region> {
        let left = self.left.or(self.x_offset).unwrap_or(0.0);
        let top = self.top.or(self.y_offset).unwrap_or(0.0);

        let mut width = match (self.width, self.right) {
            (Some(width), _) => width,
            (None, Some(right)) => right - left,
            (None, None) => bounds.width - left,
        };
        let mut height = match (self.height, self.bottom) {
            (Some(height), _) => height,
            (None, Some(bottom)) => bottom - top,
            (None, None) => bounds.height - top,
        };

        if self.even_width {
            width = round_up_to_even(width);
        }
        if self.even_height {
            height = round_up_to_even(height);
        }

        if !(width > 0.0 && height > 0.0) {
            return Err(FramestepError::Configuration(format!(
                "capture region resolves to an empty area ({width}x{height})"
            )));
        }

        Ok(Region {
            x: bounds.x + left,
            y: bounds.y + top,
            width,
            height,
        })
    }
}

fn round_up_to_even(value: f64) -> f64 {
    (value / 2.0).ceil() * 2.0
}
