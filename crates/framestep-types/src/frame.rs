use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// Guess the format from a file name or output pattern extension.
    pub fn from_extension(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// One encoded frame, tagged with the instant and position it was captured at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResult {
    pub index: u64,
    pub instant_ms: f64,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Encoded image bytes (PNG or JPEG), never raw pixels.
    pub data: Vec<u8>,
}

impl CaptureResult {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}
