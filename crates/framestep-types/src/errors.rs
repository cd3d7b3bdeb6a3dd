use thiserror::Error;

pub type Result<T, E = FramestepError> = std::result::Result<T, E>;

/// Unified error type covering every way a capture session can end early.
///
/// None of these are retried: re-rendering a frame in the browser is not
/// guaranteed to reproduce the same pixels.
#[derive(Debug, Error)]
pub enum FramestepError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("clock violation: cannot move virtual clock back to {requested_ms}ms (already at {current_ms}ms)")]
    ClockViolation { requested_ms: f64, current_ms: f64 },
    #[error("clock state error: {0}")]
    ClockState(String),
    #[error("clock override lost: {0}")]
    OverrideLost(String),
    #[error("capture failed at frame {index}: {message}")]
    Capture { index: u64, message: String },
    #[error("sink failed at frame {index}: {message}")]
    Sink { index: u64, message: String },
    #[error("page error: {0}")]
    Page(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FramestepError {
    /// Attach a frame index to an error raised while capturing that frame.
    ///
    /// Clock and override errors keep their own variant so callers can still
    /// tell a driver bug from a failed read-back.
    pub fn at_frame(self, index: u64) -> Self {
        match self {
            FramestepError::Page(message) => FramestepError::Capture { index, message },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_errors_become_capture_failures_with_index() {
        let err = FramestepError::Page("screenshot rejected".into()).at_frame(7);
        match err {
            FramestepError::Capture { index, message } => {
                assert_eq!(index, 7);
                assert_eq!(message, "screenshot rejected");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn clock_errors_keep_their_variant() {
        let err = FramestepError::ClockViolation {
            requested_ms: 10.0,
            current_ms: 20.0,
        }
        .at_frame(3);
        assert!(matches!(err, FramestepError::ClockViolation { .. }));
    }
}
