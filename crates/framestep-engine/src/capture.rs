//! Capturers: drive the clock to a frame's instant, then read the rendered
//! result back out of the page.

use std::{io::Cursor, sync::Arc};

use async_trait::async_trait;
use base64::Engine as _;
use framestep_page::{page_error, PageDriver, PageScript, ScreenshotRequest};
use framestep_types::{
    config::{CaptureConfig, CaptureMode},
    frame::{CaptureResult, ImageFormat},
    region::Region,
    timeline::FrameTimestamp,
    FramestepError, Result,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    clock::VirtualClock,
    injector::{Scheduler, Step},
};

pub const READ_CANVAS: PageScript = PageScript {
    name: "framestep.readCanvas",
    source: r#"function (selector, type, quality) {
  var canvas = document.querySelector(selector);
  if (!canvas || typeof canvas.toDataURL !== 'function') {
    return null;
  }
  return canvas.toDataURL(type, quality === null ? undefined : quality);
}"#,
};

pub const ELEMENT_BOUNDS: PageScript = PageScript {
    name: "framestep.elementBounds",
    source: r#"function (selector) {
  var element = document.querySelector(selector);
  if (!element) {
    return null;
  }
  var rect = element.getBoundingClientRect();
  return {
    x: rect.left + window.scrollX,
    y: rect.top + window.scrollY,
    width: rect.width,
    height: rect.height
  };
}"#,
};

#[async_trait]
pub trait FrameCapturer<S: Scheduler>: Send {
    fn mode(&self) -> CaptureMode;
    /// Resolve anything that depends on the loaded document. Called once,
    /// after navigation and before the first capture.
    async fn prepare(&mut self) -> Result<()>;
    async fn capture(
        &mut self,
        clock: &mut VirtualClock<S>,
        frame: FrameTimestamp,
    ) -> Result<CaptureResult>;
}

/// Pick the capturer for the configured mode. The choice holds for the whole
/// session.
pub fn capturer_for<P, S>(page: Arc<P>, config: &CaptureConfig) -> Box<dyn FrameCapturer<S>>
where
    P: PageDriver + 'static,
    S: Scheduler + 'static,
{
    match config.mode {
        CaptureMode::Screenshot => Box::new(ScreenshotCapturer::new(page, config.clone())),
        CaptureMode::Canvas => Box::new(CanvasCapturer::new(page, config)),
    }
}

/// Screenshots a region of the viewport or a selected element.
pub struct ScreenshotCapturer<P: PageDriver> {
    page: Arc<P>,
    config: CaptureConfig,
    region: Option<Region>,
}

impl<P: PageDriver> ScreenshotCapturer<P> {
    pub fn new(page: Arc<P>, config: CaptureConfig) -> Self {
        Self {
            page,
            config,
            region: None,
        }
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }
}

#[async_trait]
impl<P, S> FrameCapturer<S> for ScreenshotCapturer<P>
where
    P: PageDriver + 'static,
    S: Scheduler + 'static,
{
    fn mode(&self) -> CaptureMode {
        CaptureMode::Screenshot
    }

    async fn prepare(&mut self) -> Result<()> {
        let bounds = match &self.config.selector {
            Some(selector) => element_bounds(self.page.as_ref(), selector)
                .await?
                .ok_or_else(|| {
                    FramestepError::Configuration(format!(
                        "selector {selector} matched no element"
                    ))
                })?,
            None => Region::from_viewport(self.config.viewport),
        };
        let region = self.config.clip.resolve(bounds)?;
        info!(
            "Capturing {}x{} region at ({}, {})",
            region.width, region.height, region.x, region.y
        );
        self.region = Some(region);
        Ok(())
    }

    async fn capture(
        &mut self,
        clock: &mut VirtualClock<S>,
        frame: FrameTimestamp,
    ) -> Result<CaptureResult> {
        let region = self.region.ok_or_else(|| {
            FramestepError::ClockState("screenshot capturer used before prepare".into())
        })?;
        clock.go_to_time_and_paint(frame.instant_ms).await?;
        let request = ScreenshotRequest {
            clip: region,
            format: self.config.format,
            quality: self.config.quality,
        };
        let data = self.page.screenshot(&request).await?;
        finish(frame, self.config.format, data)
    }
}

/// Reads a canvas's backing store through `toDataURL`.
pub struct CanvasCapturer<P: PageDriver> {
    page: Arc<P>,
    selector: String,
    format: ImageFormat,
    quality: Option<u8>,
    step: Step,
}

impl<P: PageDriver> CanvasCapturer<P> {
    pub fn new(page: Arc<P>, config: &CaptureConfig) -> Self {
        let step = if config.skip_animation_frames {
            Step::TimersOnly
        } else {
            Step::AnimationFrame
        };
        Self {
            page,
            selector: config.canvas_selector().to_string(),
            format: config.format,
            quality: config.quality,
            step,
        }
    }
}

#[async_trait]
impl<P, S> FrameCapturer<S> for CanvasCapturer<P>
where
    P: PageDriver + 'static,
    S: Scheduler + 'static,
{
    fn mode(&self) -> CaptureMode {
        CaptureMode::Canvas
    }

    async fn prepare(&mut self) -> Result<()> {
        if element_bounds(self.page.as_ref(), &self.selector)
            .await?
            .is_none()
        {
            return Err(FramestepError::Configuration(format!(
                "canvas selector {} matched no element",
                self.selector
            )));
        }
        info!(
            "Capturing canvas {} as {} ({:?})",
            self.selector,
            self.format.mime_type(),
            self.step
        );
        Ok(())
    }

    async fn capture(
        &mut self,
        clock: &mut VirtualClock<S>,
        frame: FrameTimestamp,
    ) -> Result<CaptureResult> {
        match self.step {
            Step::TimersOnly => clock.go_to_time(frame.instant_ms).await?,
            Step::AnimationFrame => clock.go_to_time_and_animate(frame.instant_ms).await?,
        };
        let quality = self.quality.map(|q| f64::from(q) / 100.0);
        let reply = self
            .page
            .evaluate(
                &READ_CANVAS,
                vec![
                    json!(self.selector),
                    json!(self.format.mime_type()),
                    json!(quality),
                ],
            )
            .await?;
        let data_url = reply.as_str().ok_or_else(|| {
            page_error(format!("canvas {} is no longer in the page", self.selector))
        })?;
        let data = decode_data_url(data_url)?;
        finish(frame, self.format, data)
    }
}

async fn element_bounds<P: PageDriver + ?Sized>(
    page: &P,
    selector: &str,
) -> Result<Option<Region>> {
    let reply = page.evaluate(&ELEMENT_BOUNDS, vec![json!(selector)]).await?;
    if reply.is_null() {
        return Ok(None);
    }
    let region: Region = serde_json::from_value(reply)
        .map_err(|err| page_error(format!("malformed element bounds: {err}")))?;
    Ok(Some(region))
}

/// Decode a base64 `data:` URL into the bytes it carries.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| page_error("canvas returned a malformed data URL"))?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        return Err(page_error(format!(
            "canvas returned an unsupported data URL header {header:?}"
        )));
    }
    if payload.is_empty() {
        return Err(page_error("canvas produced an empty image"));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|err| page_error(format!("canvas data base64 decode failed: {err}")))
}

/// Read width and height from an encoded image header.
pub fn image_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|err| page_error(format!("unreadable image: {err}")))?
        .into_dimensions()
        .map_err(|err| page_error(format!("unreadable image header: {err}")))
}

fn finish(frame: FrameTimestamp, format: ImageFormat, data: Vec<u8>) -> Result<CaptureResult> {
    let (width, height) = image_dimensions(&data)?;
    debug!(
        "Frame {} captured: {}x{} ({} bytes)",
        frame.index,
        width,
        height,
        data.len()
    );
    Ok(CaptureResult {
        index: frame.index,
        instant_ms: frame.instant_ms,
        format,
        width,
        height,
        data,
    })
}
