//! Capture session: validates configuration, prepares the page, then walks the
//! frame schedule one frame at a time into an output sink.

use std::{sync::Arc, time::Duration};

use async_stream::try_stream;
use chrono::Utc;
use framestep_engine::{capturer_for, FrameCapturer, InPageScheduler, VirtualClock};
use framestep_ops::SessionLog;
use framestep_page::{normalize_url, PageDriver};
use framestep_sink::{sink_error, FrameSink};
use framestep_types::{
    config::FramestepConfig,
    events::{EventPayload, SessionReport},
    frame::CaptureResult,
    timeline::FrameSchedule,
    FramestepError, Result,
};
use futures::{pin_mut, Stream, StreamExt};
use tokio::time::sleep;
use tracing::{info, warn};

type PageClock<P> = VirtualClock<InPageScheduler<P>>;

pub struct Recorder<P>
where
    P: PageDriver + 'static,
{
    config: FramestepConfig,
    page: Arc<P>,
    clock: PageClock<P>,
    log: SessionLog,
}

impl<P> Recorder<P>
where
    P: PageDriver + 'static,
{
    /// The page is borrowed for the session; the recorder closes it when the
    /// session ends.
    pub fn new(config: FramestepConfig, page: Arc<P>) -> Self {
        let clock = VirtualClock::new(InPageScheduler::new(page.clone()), &config.clock);
        Self {
            config,
            page,
            clock,
            log: SessionLog::new(),
        }
    }

    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    /// Capture every frame into `sink`, in order.
    ///
    /// Configuration is checked before the page is touched. Any failure stops
    /// the session without capturing further frames; the page is released
    /// either way once setup has begun.
    pub async fn run<S>(mut self, sink: &mut S) -> Result<SessionReport>
    where
        S: FrameSink + ?Sized,
    {
        let started_at = Utc::now();
        self.config.validate()?;

        let log = self.log.clone();
        let outcome = self.pump(sink).await;
        self.shutdown().await;

        match outcome {
            Ok((frames_captured, first_instant_ms, last_instant_ms)) => {
                log.record(EventPayload::Finished {
                    frames: frames_captured,
                })
                .await;
                info!("Captured {} frames", frames_captured);
                Ok(SessionReport {
                    session_id: log.session_id(),
                    frames_captured,
                    first_instant_ms,
                    last_instant_ms,
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            Err((frames, err)) => {
                log.record(EventPayload::Aborted {
                    frames,
                    reason: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    async fn pump<S>(
        &mut self,
        sink: &mut S,
    ) -> std::result::Result<(u64, Option<f64>, Option<f64>), (u64, FramestepError)>
    where
        S: FrameSink + ?Sized,
    {
        let log = self.log.clone();
        let frames = self.frames();
        pin_mut!(frames);

        let mut captured = 0u64;
        let mut first = None;
        let mut last = None;
        while let Some(item) = frames.next().await {
            let frame = item.map_err(|err| (captured, err))?;
            sink.write(&frame)
                .await
                .map_err(|err| (captured, as_sink_error(frame.index, err)))?;
            log.record(EventPayload::FrameCaptured {
                index: frame.index,
                instant_ms: frame.instant_ms,
                bytes: frame.byte_len(),
            })
            .await;
            captured += 1;
            first.get_or_insert(frame.instant_ms);
            last = Some(frame.instant_ms);
        }
        sink.finish()
            .await
            .map_err(|err| (captured, as_sink_error(captured, err)))?;
        Ok((captured, first, last))
    }

    /// Captured frames as a pull-based stream. Nothing advances until the
    /// consumer asks for the next frame; dropping the stream stops capture.
    /// Call [`shutdown`](Self::shutdown) afterwards to release the page.
    pub fn frames(&mut self) -> impl Stream<Item = Result<CaptureResult>> + Send + '_ {
        try_stream! {
            self.config.validate()?;
            let schedule = FrameSchedule::from_config(&self.config.timeline)?;
            let mut capturer =
                capturer_for::<P, InPageScheduler<P>>(self.page.clone(), &self.config.capture);
            self.setup(capturer.as_mut()).await?;

            let total = schedule.frame_count();
            self.log
                .record(EventPayload::Started {
                    url: self.config.url.clone(),
                    frames: total,
                    fps: schedule.fps(),
                })
                .await;

            for frame in schedule {
                info!(
                    "Capturing frame {}/{} at {}ms",
                    frame.index + 1,
                    total,
                    frame.instant_ms
                );
                let navigations = self.clock.navigations();
                let captured = capturer
                    .capture(&mut self.clock, frame)
                    .await
                    .map_err(|err| err.at_frame(frame.index))?;
                if self.clock.navigations() != navigations {
                    self.log
                        .record(EventPayload::NavigationDetected {
                            at_ms: frame.instant_ms,
                            action: format!("{:?}", self.config.clock.on_navigation),
                        })
                        .await;
                }
                yield captured;
            }
        }
    }

    async fn setup(&mut self, capturer: &mut dyn FrameCapturer<InPageScheduler<P>>) -> Result<()> {
        let capture = &self.config.capture;
        self.page.set_viewport(capture.viewport).await?;
        if capture.transparent_background {
            self.page.set_transparent_background().await?;
        }

        self.clock.install(0.0).await?;
        let url = normalize_url(&self.config.url)?;
        self.page.navigate(&url).await?;
        self.clock.attach().await?;
        capturer.prepare().await?;

        let delay = self.config.timeline.start_delay_secs;
        if delay > 0.0 {
            info!("Waiting {}s before capturing", delay);
            sleep(Duration::from_secs_f64(delay)).await;
        }
        Ok(())
    }

    /// Close the clock and release the page.
    pub async fn shutdown(&mut self) {
        self.clock.close();
        if let Err(err) = self.page.close().await {
            warn!("Releasing page failed: {err}");
        }
    }
}

fn as_sink_error(index: u64, err: FramestepError) -> FramestepError {
    match err {
        err @ FramestepError::Sink { .. } => err,
        other => sink_error(index, other.to_string()),
    }
}
