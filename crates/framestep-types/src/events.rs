use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session event kinds recorded while capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle,
    Frame,
    Navigation,
}

/// Immutable event envelope for logging and post-run inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Started {
        url: String,
        frames: u64,
        fps: f64,
    },
    FrameCaptured {
        index: u64,
        instant_ms: f64,
        bytes: usize,
    },
    NavigationDetected {
        at_ms: f64,
        action: String,
    },
    Finished {
        frames: u64,
    },
    Aborted {
        frames: u64,
        reason: String,
    },
}

impl SessionEvent {
    pub fn new(session_id: Uuid, payload: EventPayload) -> Self {
        let kind = match &payload {
            EventPayload::FrameCaptured { .. } => EventKind::Frame,
            EventPayload::NavigationDetected { .. } => EventKind::Navigation,
            _ => EventKind::Lifecycle,
        };
        Self {
            id: Uuid::new_v4(),
            session_id,
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Summary returned by a successful capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub frames_captured: u64,
    pub first_instant_ms: Option<f64>,
    pub last_instant_ms: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
