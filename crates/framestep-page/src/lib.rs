//! Browser-automation boundary: the narrow surface the capture engine drives.

use async_trait::async_trait;
use framestep_types::{
    frame::ImageFormat,
    region::{Region, Viewport},
    FramestepError, Result,
};
use serde_json::Value;

mod chromium;

pub use chromium::ChromiumPage;

/// A function evaluated inside the page.
///
/// `source` is a JavaScript function expression; `name` identifies it to
/// drivers that do not execute JavaScript (tests, recorders).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageScript {
    pub name: &'static str,
    pub source: &'static str,
}

impl PageScript {
    /// Render `(source)(arg0, arg1, ...)` with JSON-encoded arguments.
    pub fn invocation(&self, args: &[Value]) -> String {
        let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
        format!("({})({})", self.source.trim(), rendered.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotRequest {
    pub clip: Region,
    pub format: ImageFormat,
    pub quality: Option<u8>,
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Register `script` to run before any page script, on every navigation.
    async fn add_init_script(&self, script: &PageScript, args: Vec<Value>) -> Result<()>;
    async fn navigate(&self, url: &str) -> Result<()>;
    /// Evaluate `script` with `args`, awaiting a returned promise.
    async fn evaluate(&self, script: &PageScript, args: Vec<Value>) -> Result<Value>;
    async fn screenshot(&self, request: &ScreenshotRequest) -> Result<Vec<u8>>;
    async fn set_viewport(&self, viewport: Viewport) -> Result<()>;
    async fn set_transparent_background(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Generate an error aligned with page-boundary semantics.
pub fn page_error(message: impl Into<String>) -> FramestepError {
    FramestepError::Page(message.into())
}

/// Turn a bare path into a `file://` URL; anything with a scheme passes through.
pub fn normalize_url(target: &str) -> Result<String> {
    if target.contains("://") || target.starts_with("about:") || target.starts_with("data:") {
        return Ok(target.to_string());
    }
    let path = std::path::Path::new(target);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|err| page_error(format!("cannot resolve {target}: {err}")))?
            .join(path)
    };
    Ok(format!("file://{}", absolute.display()))
}
