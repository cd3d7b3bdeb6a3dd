use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};

use crate::{
    config::{TimelineConfig, DEFAULT_DURATION_SECS},
    FramestepError, Result,
};

/// One target instant on the virtual timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameTimestamp {
    pub index: u64,
    pub instant_ms: f64,
}

/// The frames to capture: `count` instants spaced `1/fps` seconds apart,
/// starting at `start_ms`. Instants are computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSchedule {
    fps: f64,
    count: u64,
    start_ms: f64,
}

impl FrameSchedule {
    pub fn new(fps: f64, count: u64, start_ms: f64) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(FramestepError::Configuration(format!(
                "frame rate must be positive, got {fps}"
            )));
        }
        if count == 0 {
            return Err(FramestepError::Configuration(
                "frame count must be greater than zero".into(),
            ));
        }
        if !start_ms.is_finite() || start_ms < 0.0 {
            return Err(FramestepError::Configuration(format!(
                "start offset must not be negative, got {start_ms}ms"
            )));
        }
        Ok(Self {
            fps,
            count,
            start_ms,
        })
    }

    /// Build the schedule from configuration. An explicit frame count wins
    /// over a duration; without either the default duration applies.
    pub fn from_config(config: &TimelineConfig) -> Result<Self> {
        let count = match (config.frames, config.duration_secs) {
            (Some(frames), _) => frames,
            (None, duration) => {
                let duration = duration.unwrap_or(DEFAULT_DURATION_SECS);
                frames_for_duration(duration, config.fps)?
            }
        };
        Self::new(config.fps, count, config.start_secs * 1000.0)
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frame_count(&self) -> u64 {
        self.count
    }

    pub fn start_ms(&self) -> f64 {
        self.start_ms
    }

    pub fn instant_ms(&self, index: u64) -> f64 {
        self.start_ms + (index as f64 * 1000.0) / self.fps
    }

    pub fn last_instant_ms(&self) -> f64 {
        self.instant_ms(self.count - 1)
    }

    pub fn iter(&self) -> Frames {
        Frames {
            schedule: *self,
            next: 0,
        }
    }
}

impl IntoIterator for FrameSchedule {
    type Item = FrameTimestamp;
    type IntoIter = Frames;

    fn into_iter(self) -> Frames {
        self.iter()
    }
}

/// Frame count for a duration, rounded to the nearest frame so a duration
/// like `0.999s @ 60fps` still yields the final frame.
pub fn frames_for_duration(duration_secs: f64, fps: f64) -> Result<u64> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(FramestepError::Configuration(format!(
            "duration must be positive, got {duration_secs}s"
        )));
    }
    if !fps.is_finite() || fps <= 0.0 {
        return Err(FramestepError::Configuration(format!(
            "frame rate must be positive, got {fps}"
        )));
    }
    let frames = (duration_secs * fps).round();
    if frames < 1.0 {
        return Err(FramestepError::Configuration(format!(
            "{duration_secs}s at {fps}fps is shorter than one frame"
        )));
    }
    Ok(frames as u64)
}

#[derive(Debug, Clone)]
pub struct Frames {
    schedule: FrameSchedule,
    next: u64,
}

impl Iterator for Frames {
    type Item = FrameTimestamp;

    fn next(&mut self) -> Option<FrameTimestamp> {
        if self.next >= self.schedule.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(FrameTimestamp {
            index,
            instant_ms: self.schedule.instant_ms(index),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.schedule.count - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames {}

impl FusedIterator for Frames {}
