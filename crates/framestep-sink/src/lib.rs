//! Output sinks: where captured frames go, in capture order.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use framestep_types::{frame::CaptureResult, FramestepError, Result};
use futures::{stream::BoxStream, StreamExt};
use tokio::{
    fs,
    io::{self, AsyncWriteExt},
    sync::mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Consumer of captured frames. Calls arrive strictly in capture order; an
/// error stops the session.
#[async_trait]
pub trait FrameSink: Send {
    async fn write(&mut self, frame: &CaptureResult) -> Result<()>;

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes each frame to `directory/pattern`, numbering frames from 1.
pub struct DirectorySink {
    directory: PathBuf,
    pattern: String,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    pub async fn create(directory: impl AsRef<Path>, pattern: impl Into<String>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).await.map_err(|err| {
            FramestepError::Ops(format!(
                "failed to create output directory {}: {err}",
                directory.display()
            ))
        })?;
        info!("Writing frames to {:?}", directory);
        Ok(Self {
            directory,
            pattern: pattern.into(),
            written: Vec::new(),
        })
    }

    pub fn path_for(&self, index: u64) -> PathBuf {
        self.directory.join(format_pattern(&self.pattern, index + 1))
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

#[async_trait]
impl FrameSink for DirectorySink {
    async fn write(&mut self, frame: &CaptureResult) -> Result<()> {
        let path = self.path_for(frame.index);
        fs::write(&path, &frame.data)
            .await
            .map_err(|err| sink_error(frame.index, format!("{}: {err}", path.display())))?;
        debug!("Saved frame {} to {:?}", frame.index, path);
        self.written.push(path);
        Ok(())
    }
}

/// Streams encoded frames back-to-back to stdout.
pub struct StdoutSink {
    out: io::Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSink for StdoutSink {
    async fn write(&mut self, frame: &CaptureResult) -> Result<()> {
        self.out
            .write_all(&frame.data)
            .await
            .map_err(|err| sink_error(frame.index, format!("stdout: {err}")))?;
        self.out
            .flush()
            .await
            .map_err(|err| sink_error(frame.index, format!("stdout: {err}")))
    }
}

/// Hands frames to an in-process consumer over a bounded channel. `write`
/// waits while the channel is full.
pub struct ChannelSink {
    tx: mpsc::Sender<CaptureResult>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, BoxStream<'static, CaptureResult>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, ReceiverStream::new(rx).boxed())
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn write(&mut self, frame: &CaptureResult) -> Result<()> {
        self.tx
            .send(frame.clone())
            .await
            .map_err(|_| sink_error(frame.index, "frame consumer went away"))
    }
}

/// Keeps frames in memory in arrival order.
#[derive(Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<CaptureResult>>>,
    fail_at: Option<u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the frame with this index, as a broken downstream pipe would.
    pub fn failing_at(index: u64) -> Self {
        Self {
            frames: Arc::default(),
            fail_at: Some(index),
        }
    }

    pub fn frames(&self) -> Vec<CaptureResult> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn indices(&self) -> Vec<u64> {
        self.frames().iter().map(|f| f.index).collect()
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn write(&mut self, frame: &CaptureResult) -> Result<()> {
        if self.fail_at == Some(frame.index) {
            return Err(sink_error(frame.index, "broken pipe"));
        }
        self.frames
            .lock()
            .map_err(|_| sink_error(frame.index, "memory sink poisoned"))?
            .push(frame.clone());
        Ok(())
    }
}

/// Expand a printf-style pattern: `%d`, `%0Nd`, `%Nd` and `%%`.
pub fn format_pattern(pattern: &str, number: u64) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                digits.push(d);
                chars.next();
            } else {
                break;
            }
        }
        if chars.peek() == Some(&'d') {
            chars.next();
            let zero_pad = digits.starts_with('0');
            let width: usize = digits.parse().unwrap_or(0);
            if zero_pad {
                out.push_str(&format!("{number:0width$}"));
            } else {
                out.push_str(&format!("{number:width$}"));
            }
        } else {
            out.push('%');
            out.push_str(&digits);
        }
    }
    out
}

pub fn sink_error(index: u64, message: impl Into<String>) -> FramestepError {
    FramestepError::Sink {
        index,
        message: message.into(),
    }
}
