use std::sync::Arc;

use framestep_engine::MockPage;
use framestep_ops::SessionLog;
use framestep_recorder::Recorder;
use framestep_sink::{ChannelSink, DirectorySink, FrameSink, MemorySink};
use framestep_types::{
    config::{CaptureMode, FramestepConfig, NavigationPolicy},
    events::{EventKind, EventPayload},
    frame::ImageFormat,
    region::Viewport,
    FramestepError,
};
use futures::{pin_mut, StreamExt};

fn config(fps: f64, frames: u64) -> FramestepConfig {
    let mut config = FramestepConfig {
        url: "mock://animation".into(),
        ..FramestepConfig::default()
    };
    config.timeline.fps = fps;
    config.timeline.frames = Some(frames);
    config.capture.viewport = Viewport {
        width: 32,
        height: 24,
    };
    config
}

async fn record(config: FramestepConfig, page: &MockPage) -> (MemorySink, SessionLog) {
    let mut sink = MemorySink::new();
    let log = SessionLog::new();
    Recorder::new(config, Arc::new(page.clone()))
        .with_log(log.clone())
        .run(&mut sink)
        .await
        .expect("session should succeed");
    (sink, log)
}

#[tokio::test]
async fn ten_frames_at_ten_fps_cover_the_first_second() {
    let page = MockPage::new();
    let mut cfg = config(10.0, 1);
    cfg.timeline.frames = None;
    cfg.timeline.duration_secs = Some(1.0);

    let mut sink = MemorySink::new();
    let report = Recorder::new(cfg, Arc::new(page.clone()))
        .run(&mut sink)
        .await
        .unwrap();

    let expected: Vec<f64> = (0..10).map(|i| i as f64 * 100.0).collect();
    assert_eq!(report.frames_captured, 10);
    assert_eq!(report.first_instant_ms, Some(0.0));
    assert_eq!(report.last_instant_ms, Some(900.0));
    assert_eq!(sink.indices(), (0..10).collect::<Vec<u64>>());
    assert_eq!(
        sink.frames().iter().map(|f| f.instant_ms).collect::<Vec<_>>(),
        expected
    );
    assert_eq!(page.advanced_to(), expected);
    assert_eq!(page.pumped_at(), expected);
    assert_eq!(page.paint_waits(), 10);
    assert_eq!(page.navigations(), vec!["mock://animation".to_string()]);
    assert!(page.is_closed());
}

#[tokio::test]
async fn single_frame_is_captured_at_time_zero() {
    let page = MockPage::new();
    let (sink, _) = record(config(60.0, 1), &page).await;

    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].instant_ms, 0.0);
    assert_eq!((frames[0].width, frames[0].height), (32, 24));
    assert_eq!(page.advanced_to(), vec![0.0]);
}

#[tokio::test]
async fn identical_sessions_produce_identical_bytes() {
    let first_page = MockPage::new();
    let second_page = MockPage::new();
    let (first, _) = record(config(30.0, 6), &first_page).await;
    let (second, _) = record(config(30.0, 6), &second_page).await;

    let first: Vec<Vec<u8>> = first.frames().into_iter().map(|f| f.data).collect();
    let second: Vec<Vec<u8>> = second.frames().into_iter().map(|f| f.data).collect();
    assert_eq!(first.len(), 6);
    assert_eq!(first, second);
    assert_ne!(first[0], first[5]);
}

#[tokio::test]
async fn start_offset_shifts_every_instant() {
    let page = MockPage::new();
    let mut cfg = config(10.0, 3);
    cfg.timeline.start_secs = 1.0;
    let (sink, _) = record(cfg, &page).await;

    assert_eq!(page.advanced_to(), vec![1000.0, 1100.0, 1200.0]);
    assert_eq!(sink.indices(), vec![0, 1, 2]);
}

#[tokio::test]
async fn sink_failure_stops_the_session_at_that_frame() {
    let reference_page = MockPage::new();
    let (reference, _) = record(config(10.0, 10), &reference_page).await;

    let page = MockPage::new();
    let mut sink = MemorySink::failing_at(3);
    let log = SessionLog::new();
    let err = Recorder::new(config(10.0, 10), Arc::new(page.clone()))
        .with_log(log.clone())
        .run(&mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, FramestepError::Sink { index: 3, .. }));
    assert_eq!(sink.indices(), vec![0, 1, 2]);
    let written: Vec<Vec<u8>> = sink.frames().into_iter().map(|f| f.data).collect();
    let expected: Vec<Vec<u8>> = reference
        .frames()
        .into_iter()
        .take(3)
        .map(|f| f.data)
        .collect();
    assert_eq!(written, expected);
    assert_eq!(page.advanced_to().len(), 4);
    assert!(page.is_closed());

    let events = log.snapshot().await;
    assert!(matches!(
        events.last().map(|e| &e.payload),
        Some(EventPayload::Aborted { frames: 3, .. })
    ));
}

#[tokio::test]
async fn invalid_configuration_never_touches_the_page() {
    let page = MockPage::new();
    let mut cfg = config(10.0, 1);
    cfg.timeline.frames = Some(0);

    let mut sink = MemorySink::new();
    let err = Recorder::new(cfg, Arc::new(page.clone()))
        .run(&mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, FramestepError::Configuration(_)));
    assert_eq!(page.init_script_count(), 0);
    assert!(page.navigations().is_empty());
    assert!(page.viewport().is_none());
    assert!(!page.is_closed());
}

#[tokio::test]
async fn sub_frame_duration_is_rejected_before_setup() {
    let page = MockPage::new();
    let mut cfg = config(60.0, 1);
    cfg.timeline.frames = None;
    cfg.timeline.duration_secs = Some(0.001);

    let mut sink = MemorySink::new();
    let err = Recorder::new(cfg, Arc::new(page.clone()))
        .run(&mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, FramestepError::Configuration(_)));
    assert!(page.viewport().is_none());
    assert_eq!(page.init_script_count(), 0);
    assert!(page.navigations().is_empty());
}

#[tokio::test]
async fn negative_fps_is_rejected_up_front() {
    let page = MockPage::new();
    let mut sink = MemorySink::new();
    let err = Recorder::new(config(-5.0, 3), Arc::new(page.clone()))
        .run(&mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, FramestepError::Configuration(_)));
    assert!(page.navigations().is_empty());
}

#[tokio::test]
async fn failed_read_back_reports_the_frame_index() {
    let page = MockPage::new().fail_read_back_at(2);
    let mut sink = MemorySink::new();
    let err = Recorder::new(config(10.0, 5), Arc::new(page.clone()))
        .run(&mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, FramestepError::Capture { index: 2, .. }));
    assert_eq!(sink.indices(), vec![0, 1]);
    assert!(page.is_closed());
}

#[tokio::test]
async fn page_without_the_runtime_fails_before_capturing() {
    let page = MockPage::new().without_init_scripts();
    let mut sink = MemorySink::new();
    let err = Recorder::new(config(10.0, 3), Arc::new(page.clone()))
        .run(&mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, FramestepError::OverrideLost(_)));
    assert!(sink.frames().is_empty());
    assert!(page.screenshot_requests().is_empty());
    assert!(page.is_closed());
}

#[tokio::test]
async fn navigation_aborts_by_default() {
    let page = MockPage::new().reload_after_advances(2);
    let mut sink = MemorySink::new();
    let err = Recorder::new(config(10.0, 5), Arc::new(page.clone()))
        .run(&mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, FramestepError::OverrideLost(_)));
    assert_eq!(sink.indices(), vec![0, 1]);
    assert!(page.is_closed());
}

#[tokio::test]
async fn preserved_navigation_keeps_the_timeline_and_is_logged() {
    let page = MockPage::new().reload_after_advances(2);
    let mut cfg = config(10.0, 4);
    cfg.clock.on_navigation = NavigationPolicy::Preserve;
    let (sink, log) = record(cfg, &page).await;

    assert_eq!(sink.indices(), vec![0, 1, 2, 3]);
    assert_eq!(page.advanced_to(), vec![0.0, 100.0, 200.0, 300.0]);

    let events = log.snapshot().await;
    let navigations: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Navigation)
        .collect();
    assert_eq!(navigations.len(), 1);
    assert!(matches!(
        navigations[0].payload,
        EventPayload::NavigationDetected { at_ms, .. } if at_ms == 200.0
    ));
}

#[tokio::test]
async fn reset_navigation_restarts_the_page_clock() {
    let page = MockPage::new().reload_after_advances(2);
    let mut cfg = config(10.0, 4);
    cfg.clock.on_navigation = NavigationPolicy::Reset;
    let (sink, _) = record(cfg, &page).await;

    assert_eq!(
        sink.frames().iter().map(|f| f.instant_ms).collect::<Vec<_>>(),
        vec![0.0, 100.0, 200.0, 300.0]
    );
    assert_eq!(page.advanced_to(), vec![0.0, 100.0, 100.0, 200.0]);
}

#[tokio::test]
async fn canvas_mode_reads_the_canvas_each_frame() {
    let page = MockPage::new().with_canvas("#stage", 20, 10);
    let mut cfg = config(10.0, 3);
    cfg.capture.mode = CaptureMode::Canvas;
    cfg.capture.selector = Some("#stage".into());
    let (sink, _) = record(cfg, &page).await;

    let frames = sink.frames();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| (f.width, f.height) == (20, 10)));
    assert!(frames.iter().all(|f| f.format == ImageFormat::Png));
    assert!(page.screenshot_requests().is_empty());
    assert_eq!(page.pumped_at(), vec![0.0, 100.0, 200.0]);
    assert_eq!(page.paint_waits(), 0);
}

#[tokio::test]
async fn canvas_mode_can_skip_animation_frames() {
    let page = MockPage::new();
    let mut cfg = config(10.0, 3);
    cfg.capture.mode = CaptureMode::Canvas;
    cfg.capture.skip_animation_frames = true;
    let (sink, _) = record(cfg, &page).await;

    assert_eq!(sink.indices(), vec![0, 1, 2]);
    assert_eq!(page.advanced_to(), vec![0.0, 100.0, 200.0]);
    assert!(page.pumped_at().is_empty());
}

#[tokio::test]
async fn missing_canvas_is_a_configuration_error() {
    let page = MockPage::new();
    let mut cfg = config(10.0, 3);
    cfg.capture.mode = CaptureMode::Canvas;
    cfg.capture.selector = Some("#missing".into());

    let mut sink = MemorySink::new();
    let err = Recorder::new(cfg, Arc::new(page.clone()))
        .run(&mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, FramestepError::Configuration(_)));
    assert!(page.advanced_to().is_empty());
    assert!(page.is_closed());
}

#[tokio::test]
async fn page_setup_applies_viewport_and_transparency() {
    let page = MockPage::new();
    let mut cfg = config(10.0, 1);
    cfg.capture.transparent_background = true;
    record(cfg, &page).await;

    assert_eq!(
        page.viewport(),
        Some(Viewport {
            width: 32,
            height: 24
        })
    );
    assert!(page.is_transparent());
    assert_eq!(page.init_script_count(), 1);
}

#[tokio::test]
async fn frames_stream_is_pulled_one_frame_at_a_time() {
    let page = MockPage::new();
    let mut recorder = Recorder::new(config(10.0, 5), Arc::new(page.clone()));
    {
        let frames = recorder.frames();
        pin_mut!(frames);
        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(page.advanced_to(), vec![0.0]);
        let second = frames.next().await.unwrap().unwrap();
        assert_eq!(second.instant_ms, 100.0);
        assert_eq!(page.advanced_to().len(), 2);
    }
    recorder.shutdown().await;
    assert_eq!(page.advanced_to().len(), 2);
    assert!(page.is_closed());
}

#[tokio::test]
async fn channel_sink_delivers_frames_in_order() {
    let page = MockPage::new();
    let (mut sink, stream) = ChannelSink::new(16);
    let report = Recorder::new(config(10.0, 4), Arc::new(page))
        .run(&mut sink)
        .await
        .unwrap();
    drop(sink);

    let indices: Vec<u64> = stream.map(|f| f.index).collect().await;
    assert_eq!(report.frames_captured, 4);
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn directory_sink_writes_numbered_files() {
    let dir = std::env::temp_dir().join(format!("framestep-session-{}", std::process::id()));
    let page = MockPage::new();
    let mut sink = DirectorySink::create(&dir, "frame-%03d.png").await.unwrap();
    Recorder::new(config(10.0, 2), Arc::new(page))
        .run(&mut sink)
        .await
        .unwrap();
    sink.finish().await.unwrap();

    assert!(dir.join("frame-001.png").exists());
    assert!(dir.join("frame-002.png").exists());
    assert!(!dir.join("frame-003.png").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn lifecycle_events_bracket_the_session() {
    let page = MockPage::new();
    let (_, log) = record(config(10.0, 2), &page).await;

    let events = log.snapshot().await;
    assert!(events.iter().all(|e| e.session_id == log.session_id()));
    assert!(matches!(
        events.first().map(|e| &e.payload),
        Some(EventPayload::Started { frames: 2, .. })
    ));
    assert_eq!(
        events.iter().filter(|e| e.kind == EventKind::Frame).count(),
        2
    );
    assert!(matches!(
        events.last().map(|e| &e.payload),
        Some(EventPayload::Finished { frames: 2 })
    ));
}
