//! In-memory page that emulates the clock runtime without a browser.
//!
//! Frames it renders depend only on the page's virtual time, so two sessions
//! with the same configuration produce identical bytes.

use std::{
    collections::HashMap,
    io::Cursor,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::Engine as _;
use framestep_page::{page_error, PageDriver, PageScript, ScreenshotRequest};
use framestep_types::{
    frame::ImageFormat,
    region::{Region, Viewport},
    Result,
};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    capture::{ELEMENT_BOUNDS, READ_CANVAS},
    injector::{ADVANCE, HANDSHAKE, OVERRIDE_RUNTIME},
};

#[derive(Debug, Clone)]
struct MockRuntime {
    token: String,
    now: f64,
}

#[derive(Debug, Clone)]
struct MockCanvas {
    selector: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Default)]
struct MockState {
    init_scripts: Vec<(&'static str, Vec<Value>)>,
    ignore_init_scripts: bool,
    runtime: Option<MockRuntime>,
    generation: u64,
    navigations: Vec<String>,
    viewport: Option<Viewport>,
    transparent: bool,
    elements: HashMap<String, Region>,
    canvas: Option<MockCanvas>,
    advanced_to: Vec<f64>,
    pumped_at: Vec<f64>,
    paint_waits: usize,
    screenshots: Vec<ScreenshotRequest>,
    read_backs: u64,
    fail_read_back_at: Option<u64>,
    reload_after_advances: Option<usize>,
    closed: bool,
}

/// Lightweight page used for integration and testing.
#[derive(Clone, Default)]
pub struct MockPage {
    state: Arc<Mutex<MockState>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default().with_canvas("canvas", 64, 48)
    }

    pub fn with_canvas(self, selector: &str, width: u32, height: u32) -> Self {
        self.update(|state| {
            state.canvas = Some(MockCanvas {
                selector: selector.to_string(),
                width,
                height,
            });
            state.elements.insert(
                selector.to_string(),
                Region {
                    x: 0.0,
                    y: 0.0,
                    width: width as f64,
                    height: height as f64,
                },
            );
        });
        self
    }

    pub fn with_element(self, selector: &str, bounds: Region) -> Self {
        self.update(|state| {
            state.elements.insert(selector.to_string(), bounds);
        });
        self
    }

    /// Fail the n-th (0-based) screenshot or canvas read-back.
    pub fn fail_read_back_at(self, index: u64) -> Self {
        self.update(|state| state.fail_read_back_at = Some(index));
        self
    }

    /// Simulate a document whose init scripts never ran.
    pub fn without_init_scripts(self) -> Self {
        self.update(|state| state.ignore_init_scripts = true);
        self
    }

    /// Navigate (and reinstall the runtime) just before the advance that
    /// follows `count` completed advances.
    pub fn reload_after_advances(self, count: usize) -> Self {
        self.update(|state| state.reload_after_advances = Some(count));
        self
    }

    pub fn init_script_count(&self) -> usize {
        self.read(|state| state.init_scripts.len())
    }

    pub fn navigations(&self) -> Vec<String> {
        self.read(|state| state.navigations.clone())
    }

    pub fn advanced_to(&self) -> Vec<f64> {
        self.read(|state| state.advanced_to.clone())
    }

    pub fn pumped_at(&self) -> Vec<f64> {
        self.read(|state| state.pumped_at.clone())
    }

    pub fn paint_waits(&self) -> usize {
        self.read(|state| state.paint_waits)
    }

    pub fn screenshot_requests(&self) -> Vec<ScreenshotRequest> {
        self.read(|state| state.screenshots.clone())
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.read(|state| state.viewport)
    }

    pub fn is_transparent(&self) -> bool {
        self.read(|state| state.transparent)
    }

    pub fn is_closed(&self) -> bool {
        self.read(|state| state.closed)
    }

    fn update(&self, f: impl FnOnce(&mut MockState)) {
        if let Ok(mut guard) = self.state.lock() {
            f(&mut guard);
        }
    }

    fn read<T: Default>(&self, f: impl FnOnce(&MockState) -> T) -> T {
        self.state.lock().map(|guard| f(&guard)).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| page_error("mock page state poisoned"))
    }
}

impl MockState {
    fn load_document(&mut self) {
        self.generation += 1;
        self.runtime = None;
        if self.ignore_init_scripts {
            return;
        }
        let options = self
            .init_scripts
            .iter()
            .find(|(name, _)| *name == OVERRIDE_RUNTIME.name)
            .and_then(|(_, args)| args.first().cloned());
        if let Some(options) = options {
            let initial = options
                .get("initialTime")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            self.runtime = Some(MockRuntime {
                token: format!("mock-{}", self.generation),
                now: initial,
            });
        }
    }

    fn ack(&self, advanced: bool) -> Value {
        match &self.runtime {
            Some(runtime) => json!({
                "now": runtime.now,
                "token": runtime.token,
                "advanced": advanced,
            }),
            None => Value::Null,
        }
    }

    fn advance(&mut self, args: &[Value]) -> Result<Value> {
        if self.reload_after_advances == Some(self.advanced_to.len()) {
            self.reload_after_advances = None;
            self.load_document();
        }
        let ms = arg_f64(args, 0)?;
        let pump = args.get(1).and_then(Value::as_bool).unwrap_or(false);
        let await_paint = args.get(2).and_then(Value::as_bool).unwrap_or(false);
        let expected = args.get(3).and_then(Value::as_str);

        let Some(runtime) = self.runtime.as_mut() else {
            return Ok(Value::Null);
        };
        if expected.is_some_and(|token| token != runtime.token) {
            return Ok(self.ack(false));
        }
        runtime.now = runtime.now.max(ms);
        let now = runtime.now;
        self.advanced_to.push(now);
        if pump {
            self.pumped_at.push(now);
        }
        if await_paint {
            self.paint_waits += 1;
        }
        Ok(self.ack(true))
    }

    fn begin_read_back(&mut self) -> Result<f64> {
        let attempt = self.read_backs;
        self.read_backs += 1;
        if self.fail_read_back_at == Some(attempt) {
            return Err(page_error(format!("mock read-back {attempt} rejected")));
        }
        Ok(self.runtime.as_ref().map(|r| r.now).unwrap_or(0.0))
    }

    fn read_canvas(&mut self, args: &[Value]) -> Result<Value> {
        let selector = arg_str(args, 0)?;
        let mime = args
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or("image/png")
            .to_string();
        let quality = args
            .get(2)
            .and_then(Value::as_f64)
            .map(|q| (q * 100.0).round() as u8);
        let Some(canvas) = self.canvas.clone().filter(|c| c.selector == selector) else {
            return Ok(Value::Null);
        };
        let now = self.begin_read_back()?;
        if canvas.width == 0 || canvas.height == 0 {
            return Ok(json!("data:,"));
        }
        let format = if mime == "image/jpeg" {
            ImageFormat::Jpeg
        } else {
            ImageFormat::Png
        };
        let bytes = render_frame(now, canvas.width, canvas.height, format, quality, false)?;
        let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(json!(format!("data:{};base64,{payload}", format.mime_type())))
    }
}

#[async_trait]
impl PageDriver for MockPage {
    async fn add_init_script(&self, script: &PageScript, args: Vec<Value>) -> Result<()> {
        self.lock()?.init_scripts.push((script.name, args));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        info!("Mock navigation to {}", url);
        let mut state = self.lock()?;
        state.navigations.push(url.to_string());
        state.load_document();
        Ok(())
    }

    async fn evaluate(&self, script: &PageScript, args: Vec<Value>) -> Result<Value> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(page_error("mock page is closed"));
        }
        match script.name {
            name if name == HANDSHAKE.name => Ok(state.ack(false)),
            name if name == ADVANCE.name => state.advance(&args),
            name if name == READ_CANVAS.name => state.read_canvas(&args),
            name if name == ELEMENT_BOUNDS.name => {
                let selector = arg_str(&args, 0)?;
                Ok(state
                    .elements
                    .get(selector)
                    .map(|r| json!({ "x": r.x, "y": r.y, "width": r.width, "height": r.height }))
                    .unwrap_or(Value::Null))
            }
            other => Err(page_error(format!("mock page cannot evaluate {other}"))),
        }
    }

    async fn screenshot(&self, request: &ScreenshotRequest) -> Result<Vec<u8>> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(page_error("mock page is closed"));
        }
        state.screenshots.push(request.clone());
        let now = state.begin_read_back()?;
        render_frame(
            now,
            request.clip.width.round() as u32,
            request.clip.height.round() as u32,
            request.format,
            request.quality,
            state.transparent,
        )
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.lock()?.viewport = Some(viewport);
        Ok(())
    }

    async fn set_transparent_background(&self) -> Result<()> {
        self.lock()?.transparent = true;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.lock()?.closed = true;
        Ok(())
    }
}

fn arg_f64(args: &[Value], index: usize) -> Result<f64> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| page_error(format!("argument {index} must be a number")))
}

fn arg_str(args: &[Value], index: usize) -> Result<&str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| page_error(format!("argument {index} must be a string")))
}

/// Draw a frame whose pixels encode `now`: a moving column over a gradient.
fn render_frame(
    now: f64,
    width: u32,
    height: u32,
    format: ImageFormat,
    quality: Option<u8>,
    transparent: bool,
) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(page_error("cannot render an empty frame"));
    }
    let ticks = now.round().max(0.0) as u64;
    let shade = (ticks % 256) as u8;
    let column = ((ticks / 10) % width as u64) as u32;
    let alpha = if transparent { 0 } else { 255 };
    let pixels = RgbaImage::from_fn(width, height, |x, y| {
        if x == column {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([shade, (x % 256) as u8, (y % 256) as u8, alpha])
        }
    });

    let mut cursor = Cursor::new(Vec::new());
    let encoded = match format {
        ImageFormat::Png => {
            DynamicImage::ImageRgba8(pixels).write_to(&mut cursor, ImageOutputFormat::Png)
        }
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(pixels).to_rgb8())
            .write_to(&mut cursor, ImageOutputFormat::Jpeg(quality.unwrap_or(90))),
    };
    encoded.map_err(|err| page_error(format!("mock render failed: {err}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runtime_appears_only_after_registered_navigation() {
        let page = MockPage::new();
        page.navigate("mock://a").await.unwrap();
        assert_eq!(page.evaluate(&HANDSHAKE, vec![]).await.unwrap(), Value::Null);

        page.add_init_script(&OVERRIDE_RUNTIME, vec![json!({ "initialTime": 25.0 })])
            .await
            .unwrap();
        page.navigate("mock://a").await.unwrap();
        let ack = page.evaluate(&HANDSHAKE, vec![]).await.unwrap();
        assert_eq!(ack["now"], json!(25.0));
        assert_eq!(ack["token"], json!("mock-2"));
        assert_eq!(page.navigations().len(), 2);
    }

    #[test]
    fn rendering_is_deterministic_per_instant() {
        let a = render_frame(100.0, 16, 8, ImageFormat::Png, None, false).unwrap();
        let b = render_frame(100.0, 16, 8, ImageFormat::Png, None, false).unwrap();
        let c = render_frame(116.0, 16, 8, ImageFormat::Png, None, false).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
