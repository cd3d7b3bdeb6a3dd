use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    frame::ImageFormat, region::Viewport, timeline::FrameSchedule, FramestepError, Result,
};

pub const DEFAULT_FPS: f64 = 60.0;
pub const DEFAULT_DURATION_SECS: f64 = 5.0;
pub const DEFAULT_OUTPUT_PATTERN: &str = "image-%09d.png";
pub const DEFAULT_CANVAS_SELECTOR: &str = "canvas";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub fps: f64,
    pub duration_secs: Option<f64>,
    pub frames: Option<u64>,
    pub start_secs: f64,
    /// Real seconds to wait after load. Not part of the virtual timeline.
    pub start_delay_secs: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            duration_secs: None,
            frames: None,
            start_secs: 0.0,
            start_delay_secs: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Screenshot,
    Canvas,
}

/// Offsets and size of the captured region, relative to the selected element
/// or the viewport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    pub x_offset: Option<f64>,
    pub y_offset: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub left: Option<f64>,
    pub right: Option<f64>,
    pub top: Option<f64>,
    pub bottom: Option<f64>,
    pub even_width: bool,
    pub even_height: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub selector: Option<String>,
    pub transparent_background: bool,
    pub format: ImageFormat,
    pub quality: Option<u8>,
    /// Canvas mode only: advance timers without pumping animation frames.
    pub skip_animation_frames: bool,
    pub viewport: Viewport,
    pub clip: ClipConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Screenshot,
            selector: None,
            transparent_background: false,
            format: ImageFormat::Png,
            quality: None,
            skip_animation_frames: false,
            viewport: Viewport::default(),
            clip: ClipConfig::default(),
        }
    }
}

impl CaptureConfig {
    pub fn canvas_selector(&self) -> &str {
        self.selector.as_deref().unwrap_or(DEFAULT_CANVAS_SELECTOR)
    }
}

/// What the clock driver does when the page navigates in the middle of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationPolicy {
    #[default]
    Abort,
    Preserve,
    Reset,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub on_navigation: NavigationPolicy,
    /// Wall-clock epoch reported by the page's `Date`. Real load time when unset.
    pub epoch_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub pattern: String,
    pub stdout: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            pattern: DEFAULT_OUTPUT_PATTERN.into(),
            stdout: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
    pub quiet: bool,
    pub log_to_stderr: bool,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            quiet: false,
            log_to_stderr: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub no_sandbox: bool,
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            no_sandbox: false,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramestepConfig {
    pub url: String,
    pub timeline: TimelineConfig,
    pub capture: CaptureConfig,
    pub clock: ClockConfig,
    pub output: OutputConfig,
    pub ops: OpsConfig,
    pub browser: BrowserConfig,
}

impl Default for FramestepConfig {
    fn default() -> Self {
        Self {
            url: "index.html".into(),
            timeline: TimelineConfig::default(),
            capture: CaptureConfig::default(),
            clock: ClockConfig::default(),
            output: OutputConfig::default(),
            ops: OpsConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

impl FramestepConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            FramestepError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            FramestepError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(config_error("url must not be empty"));
        }
        let timeline = &self.timeline;
        if !timeline.fps.is_finite() || timeline.fps <= 0.0 {
            return Err(config_error("timeline.fps must be a positive number"));
        }
        if let Some(duration) = timeline.duration_secs {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(config_error(
                    "timeline.duration_secs must be a positive number",
                ));
            }
        }
        if timeline.frames == Some(0) {
            return Err(config_error("timeline.frames must be greater than zero"));
        }
        if !timeline.start_secs.is_finite() || timeline.start_secs < 0.0 {
            return Err(config_error("timeline.start_secs must not be negative"));
        }
        if !timeline.start_delay_secs.is_finite() || timeline.start_delay_secs < 0.0 {
            return Err(config_error(
                "timeline.start_delay_secs must not be negative",
            ));
        }

        let capture = &self.capture;
        if capture.viewport.width == 0 || capture.viewport.height == 0 {
            return Err(config_error(
                "capture.viewport dimensions must be greater than zero",
            ));
        }
        if let Some(quality) = capture.quality {
            if quality > 100 {
                return Err(config_error("capture.quality must be between 0 and 100"));
            }
        }
        if let Some(selector) = &capture.selector {
            if selector.trim().is_empty() {
                return Err(config_error("capture.selector must not be empty"));
            }
        }
        if !self.output.stdout && self.output.pattern.trim().is_empty() {
            return Err(config_error("output.pattern must not be empty"));
        }
        FrameSchedule::from_config(timeline)?;
        Ok(())
    }
}

fn config_error(message: &str) -> FramestepError {
    FramestepError::Configuration(message.into())
}
