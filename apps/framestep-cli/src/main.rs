use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command, CommandFactory, FromArgMatches, Parser};
use framestep_ops::init_tracing;
use framestep_page::ChromiumPage;
use framestep_recorder::Recorder;
use framestep_sink::{DirectorySink, FrameSink, StdoutSink};
use framestep_types::{
    config::{CaptureMode, FramestepConfig, NavigationPolicy},
    frame::ImageFormat,
    region::Viewport,
};
use tracing::info;

/// Capture frames of a web page animation on a virtual clock.
#[derive(Debug, Parser)]
#[command(name = "framestep", about)]
struct Cli {
    /// Page to capture. Bare paths are loaded as local files.
    url: Option<String>,

    /// TOML file with base settings; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short = 'o', long = "output-directory")]
    output_directory: Option<PathBuf>,
    /// printf-style file name, e.g. image-%03d.png
    #[arg(short = 'O', long = "output-pattern")]
    output_pattern: Option<String>,
    #[arg(short = 'R', long)]
    fps: Option<f64>,
    #[arg(short = 'd', long)]
    duration: Option<f64>,
    #[arg(long)]
    frames: Option<u64>,
    #[arg(short = 'S', long)]
    selector: Option<String>,
    /// Capture from the canvas element, optionally naming the image type.
    #[arg(long = "canvas-capture-mode", value_name = "FORMAT", num_args = 0..=1)]
    canvas_capture_mode: Option<Option<String>>,
    /// Canvas mode: advance timers without running animation frames.
    #[arg(long)]
    skip_animation_frames: bool,
    #[arg(long)]
    quality: Option<u8>,
    #[arg(long)]
    stdout: bool,
    /// Viewport in pixels, as WIDTH[,HEIGHT].
    #[arg(short = 'V', long, value_parser = parse_viewport)]
    viewport: Option<(u32, Option<u32>)>,
    #[arg(long)]
    transparent_background: bool,
    #[arg(long)]
    even_width: bool,
    #[arg(long)]
    even_height: bool,
    /// Virtual seconds to run before the first frame.
    #[arg(short = 's', long)]
    start: Option<f64>,
    /// Real seconds to wait after the page loads.
    #[arg(long)]
    start_delay: Option<f64>,
    #[arg(short = 'x', long, allow_hyphen_values = true)]
    x_offset: Option<f64>,
    #[arg(short = 'y', long, allow_hyphen_values = true)]
    y_offset: Option<f64>,
    #[arg(short = 'W', long)]
    width: Option<f64>,
    #[arg(short = 'H', long)]
    height: Option<f64>,
    #[arg(short = 'l', long)]
    left: Option<f64>,
    #[arg(short = 'r', long)]
    right: Option<f64>,
    #[arg(short = 't', long)]
    top: Option<f64>,
    #[arg(short = 'b', long)]
    bottom: Option<f64>,
    #[arg(long, value_parser = parse_policy)]
    on_navigation: Option<NavigationPolicy>,
    /// Wall-clock epoch in milliseconds reported by the page's Date.
    #[arg(long)]
    epoch: Option<f64>,
    #[arg(short = 'q', long)]
    quiet: bool,
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long)]
    browser: Option<PathBuf>,
    #[arg(long)]
    headful: bool,
    #[arg(long)]
    no_sandbox: bool,
    #[arg(long = "browser-arg", allow_hyphen_values = true)]
    browser_args: Vec<String>,
}

/// `-V` is taken by `--viewport`, so the version flag lives on `-v`.
fn command() -> Command {
    Cli::command()
        .version(env!("CARGO_PKG_VERSION"))
        .disable_version_flag(true)
        .arg(
            Arg::new("version")
                .short('v')
                .long("version")
                .help("Print version")
                .action(ArgAction::Version),
        )
}

fn parse_cli<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    Cli::from_arg_matches(&matches)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_cli(std::env::args_os()) {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };
    let quiet = cli.quiet;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if !quiet {
                eprintln!("framestep: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(cli)?;
    init_tracing(&config.ops)?;
    config.validate()?;

    let page = Arc::new(ChromiumPage::launch(&config.browser, config.capture.viewport).await?);
    let mut sink: Box<dyn FrameSink> = if config.output.stdout {
        Box::new(StdoutSink::new())
    } else {
        let pattern = config.output.pattern.clone();
        Box::new(DirectorySink::create(&config.output.directory, pattern).await?)
    };

    let report = Recorder::new(config, page).run(sink.as_mut()).await?;
    info!(
        "Session {} finished with {} frames",
        report.session_id, report.frames_captured
    );
    Ok(())
}

fn build_config(cli: Cli) -> Result<FramestepConfig> {
    let mut config = match &cli.config {
        Some(path) => FramestepConfig::from_file(path)?,
        None => FramestepConfig::default(),
    };

    if let Some(url) = cli.url {
        config.url = url;
    }

    let timeline = &mut config.timeline;
    if let Some(fps) = cli.fps {
        timeline.fps = fps;
    }
    if let Some(duration) = cli.duration {
        timeline.duration_secs = Some(duration);
    }
    if let Some(frames) = cli.frames {
        timeline.frames = Some(frames);
    }
    if let Some(start) = cli.start {
        timeline.start_secs = start;
    }
    if let Some(delay) = cli.start_delay {
        timeline.start_delay_secs = delay;
    }

    if let Some(directory) = cli.output_directory {
        config.output.directory = directory;
    }
    if let Some(pattern) = cli.output_pattern {
        config.output.pattern = pattern;
    }
    config.output.stdout |= cli.stdout;

    let capture = &mut config.capture;
    if let Some(format) = ImageFormat::from_extension(&config.output.pattern) {
        capture.format = format;
    }
    if let Some(requested) = cli.canvas_capture_mode {
        capture.mode = CaptureMode::Canvas;
        if let Some(name) = requested {
            capture.format = parse_format(&name)?;
        }
    }
    if let Some(selector) = cli.selector {
        capture.selector = Some(selector);
    }
    if let Some(quality) = cli.quality {
        capture.quality = Some(quality);
    }
    capture.skip_animation_frames |= cli.skip_animation_frames;
    capture.transparent_background |= cli.transparent_background;
    if let Some((width, height)) = cli.viewport {
        capture.viewport = Viewport {
            width,
            height: height.unwrap_or(capture.viewport.height),
        };
    }

    let clip = &mut capture.clip;
    clip.even_width |= cli.even_width;
    clip.even_height |= cli.even_height;
    for (slot, value) in [
        (&mut clip.x_offset, cli.x_offset),
        (&mut clip.y_offset, cli.y_offset),
        (&mut clip.width, cli.width),
        (&mut clip.height, cli.height),
        (&mut clip.left, cli.left),
        (&mut clip.right, cli.right),
        (&mut clip.top, cli.top),
        (&mut clip.bottom, cli.bottom),
    ] {
        if value.is_some() {
            *slot = value;
        }
    }

    if let Some(policy) = cli.on_navigation {
        config.clock.on_navigation = policy;
    }
    if let Some(epoch) = cli.epoch {
        config.clock.epoch_ms = Some(epoch);
    }

    config.ops.quiet |= cli.quiet;
    if let Some(level) = cli.log_level {
        config.ops.log_level = level;
    }
    // Frame bytes own stdout.
    config.ops.log_to_stderr |= config.output.stdout;

    let browser = &mut config.browser;
    if let Some(executable) = cli.browser {
        browser.executable = Some(executable);
    }
    if cli.headful {
        browser.headless = false;
    }
    browser.no_sandbox |= cli.no_sandbox;
    browser.args.extend(cli.browser_args);

    Ok(config)
}

fn parse_viewport(raw: &str) -> Result<(u32, Option<u32>)> {
    let mut parts = raw.split(',').map(str::trim);
    let width = parts
        .next()
        .ok_or_else(|| anyhow!("viewport needs a width"))?
        .parse()?;
    let height = parts.next().map(str::parse::<u32>).transpose()?;
    if parts.next().is_some() {
        return Err(anyhow!("viewport takes WIDTH[,HEIGHT], got {raw}"));
    }
    Ok((width, height))
}

fn parse_policy(raw: &str) -> Result<NavigationPolicy> {
    match raw.to_ascii_lowercase().as_str() {
        "abort" => Ok(NavigationPolicy::Abort),
        "preserve" => Ok(NavigationPolicy::Preserve),
        "reset" => Ok(NavigationPolicy::Reset),
        other => Err(anyhow!("unknown navigation policy {other}")),
    }
}

fn parse_format(raw: &str) -> Result<ImageFormat> {
    let name = raw.trim().to_ascii_lowercase();
    let name = name.strip_prefix("image/").unwrap_or(&name);
    ImageFormat::from_extension(&format!("frame.{name}"))
        .ok_or_else(|| anyhow!("unsupported canvas image type {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> FramestepConfig {
        let cli = parse_cli(std::iter::once("framestep").chain(args.iter().copied())).unwrap();
        build_config(cli).unwrap()
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = parse(&[]);
        assert_eq!(config.url, "index.html");
        assert_eq!(config.timeline.fps, 60.0);
        assert_eq!(config.capture.mode, CaptureMode::Screenshot);
        assert_eq!(config.output.pattern, "image-%09d.png");
        assert!(!config.ops.log_to_stderr);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn flags_override_every_section() {
        let config = parse(&[
            "page.html",
            "-R",
            "30",
            "--frames",
            "12",
            "-V",
            "640,480",
            "-O",
            "shot-%03d.jpg",
            "--canvas-capture-mode",
            "--on-navigation",
            "preserve",
            "-W",
            "100",
            "--even-width",
            "--headful",
        ]);
        assert_eq!(config.url, "page.html");
        assert_eq!(config.timeline.fps, 30.0);
        assert_eq!(config.timeline.frames, Some(12));
        assert_eq!(
            config.capture.viewport,
            Viewport {
                width: 640,
                height: 480
            }
        );
        assert_eq!(config.capture.mode, CaptureMode::Canvas);
        assert_eq!(config.capture.format, ImageFormat::Jpeg);
        assert_eq!(config.capture.clip.width, Some(100.0));
        assert!(config.capture.clip.even_width);
        assert_eq!(config.clock.on_navigation, NavigationPolicy::Preserve);
        assert!(!config.browser.headless);
    }

    #[test]
    fn canvas_mode_accepts_an_explicit_type() {
        let config = parse(&["--canvas-capture-mode", "image/jpeg"]);
        assert_eq!(config.capture.mode, CaptureMode::Canvas);
        assert_eq!(config.capture.format, ImageFormat::Jpeg);
    }

    #[test]
    fn width_only_viewport_keeps_default_height() {
        let config = parse(&["-V", "1024"]);
        assert_eq!(
            config.capture.viewport,
            Viewport {
                width: 1024,
                height: 600
            }
        );
    }

    #[test]
    fn stdout_moves_logs_to_stderr() {
        let config = parse(&["--stdout"]);
        assert!(config.output.stdout);
        assert!(config.ops.log_to_stderr);
    }

    #[test]
    fn zero_frames_fail_validation() {
        let config = parse(&["--frames", "0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn command_definition_is_consistent() {
        command().debug_assert();
    }

    #[test]
    fn lowercase_v_prints_the_version() {
        for flag in ["-v", "--version"] {
            let err = parse_cli(["framestep", flag]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        }
        let cli = parse_cli(["framestep", "-V", "320,240"]).unwrap();
        assert_eq!(cli.viewport, Some((320, Some(240))));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_viewport("800,600,1").is_err());
        assert!(parse_viewport("wide").is_err());
        assert!(parse_policy("ignore").is_err());
        assert!(parse_format("gif").is_err());
    }
}
