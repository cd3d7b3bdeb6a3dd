//! Operational helpers: logging setup and the in-memory session event log.

use std::sync::Arc;

use framestep_types::{
    config::OpsConfig,
    events::{EventPayload, SessionEvent},
    FramestepError, Result,
};
use tokio::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

/// Install the global subscriber. `quiet` silences everything; `log_to_stderr`
/// keeps stdout free for frame data.
pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = if config.quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_new(config.log_level.clone())
            .or_else(|_| EnvFilter::try_new("info"))
            .map_err(|err| FramestepError::Ops(format!("failed to create log filter: {err}")))?
    };

    let builder = fmt().with_env_filter(filter);
    let installed = if config.log_to_stderr {
        builder.with_writer(std::io::stderr).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| FramestepError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Events recorded by one capture session.
#[derive(Clone)]
pub struct SessionLog {
    session_id: Uuid,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            events: Arc::default(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn record(&self, payload: EventPayload) {
        let event = SessionEvent::new(self.session_id, payload);
        debug!("Session event {:?}", event.kind);
        self.events.lock().await.push(event);
    }

    pub async fn snapshot(&self) -> Vec<SessionEvent> {
        self.events.lock().await.clone()
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framestep_types::events::EventKind;

    #[tokio::test]
    async fn records_events_in_order_under_one_session() {
        let log = SessionLog::new();
        log.record(EventPayload::Started {
            url: "mock://page".into(),
            frames: 2,
            fps: 60.0,
        })
        .await;
        log.record(EventPayload::FrameCaptured {
            index: 0,
            instant_ms: 0.0,
            bytes: 10,
        })
        .await;
        log.record(EventPayload::Finished { frames: 2 }).await;

        let events = log.snapshot().await;
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Lifecycle, EventKind::Frame, EventKind::Lifecycle]
        );
        assert!(events.iter().all(|e| e.session_id == log.session_id()));
    }
}
