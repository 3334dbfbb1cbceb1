use std::sync::{Arc, Mutex};
use std::time::Duration;

use live_detect::frame::CapturedImage;
use live_detect::pipeline::{channel, SyntheticSource};
use live_detect::{
    BackendError, BackendKind, DetectionResult, DropReason, Frame, InferenceBackend, LogOverlay,
    ManualClock, Pipeline, PipelineSettings, PipelineState, StopReason,
};

/// Echoes the frame back after a fixed delay, recording what it saw.
struct SleepBackend {
    name: String,
    delay: Duration,
    seen: Arc<Mutex<Vec<i64>>>,
}

impl SleepBackend {
    fn new(name: &str, delay_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::from_millis(delay_ms),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl InferenceBackend for SleepBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OnDevice
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, BackendError> {
        self.seen.lock().unwrap().push(frame.capture_ts());
        std::thread::sleep(self.delay);
        Ok(DetectionResult {
            frame_id: frame.id(),
            capture_ts: frame.capture_ts(),
            recv_ts: frame.capture_ts(),
            inference_ts: frame.capture_ts(),
            detections: Vec::new(),
        })
    }
}

/// Fails to load its model on the first frame.
struct BrokenModel;

impl InferenceBackend for BrokenModel {
    fn name(&self) -> &str {
        "broken"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OnDevice
    }

    fn infer(&mut self, _frame: &Frame) -> Result<DetectionResult, BackendError> {
        Err(BackendError::ModelLoad("weights.onnx not found".into()))
    }
}

/// Reports every result as captured at a fixed instant in the past.
struct RewindBackend {
    capture_ts: i64,
}

impl InferenceBackend for RewindBackend {
    fn name(&self) -> &str {
        "rewind"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, BackendError> {
        let capture_ts = if frame.capture_ts() >= 2_000 {
            self.capture_ts
        } else {
            frame.capture_ts()
        };
        Ok(DetectionResult {
            frame_id: frame.id(),
            capture_ts,
            recv_ts: frame.capture_ts(),
            inference_ts: frame.capture_ts(),
            detections: Vec::new(),
        })
    }
}

/// Times out on every other call and echoes the frame otherwise.
#[derive(Default)]
struct FlakyBackend {
    calls: u64,
}

impl InferenceBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, BackendError> {
        self.calls += 1;
        if self.calls % 2 == 1 {
            return Err(BackendError::Timeout(Duration::from_millis(50)));
        }
        Ok(DetectionResult {
            frame_id: frame.id(),
            capture_ts: frame.capture_ts(),
            recv_ts: frame.capture_ts(),
            inference_ts: frame.capture_ts(),
            detections: Vec::new(),
        })
    }
}

fn settings(capacity: usize) -> PipelineSettings {
    PipelineSettings {
        queue_capacity: capacity,
        idle_poll: Duration::from_millis(5),
        ..PipelineSettings::default()
    }
}

fn image(capture_ts: i64) -> CapturedImage {
    CapturedImage::new(vec![0; 3], 1, 1).with_capture_ts(capture_ts)
}

fn run_synthetic(backend_ms: u64) -> Pipeline {
    let mut pipeline = Pipeline::new(
        Box::new(SleepBackend::new("sleep", backend_ms)),
        Box::new(LogOverlay),
        settings(5),
    );
    let source = SyntheticSource::new("stub://test", 32, 24)
        .with_interval(Duration::from_millis(70))
        .with_max_frames(15);
    pipeline.start(Box::new(source)).unwrap();
    assert!(pipeline.wait_stopped(Duration::from_secs(10)));
    assert_eq!(pipeline.stop_reason(), Some(StopReason::SourceEnded));
    pipeline.stop().unwrap();
    pipeline
}

#[test]
fn backend_faster_than_capture_keeps_drop_rate_low() {
    let pipeline = run_synthetic(40);
    let tracker = pipeline.tracker();
    assert_eq!(tracker.frames_captured(), 15);
    assert!(
        tracker.drop_rate() < 0.2,
        "drop rate {} with a 40ms backend",
        tracker.drop_rate()
    );
    assert_eq!(
        tracker.frames_processed() + tracker.frames_dropped(),
        tracker.frames_captured()
    );
    assert!(tracker.total_percentiles().is_some());
}

#[test]
fn backend_slower_than_capture_drops_most_frames() {
    let pipeline = run_synthetic(300);
    let tracker = pipeline.tracker();
    assert_eq!(tracker.frames_captured(), 15);
    assert!(
        tracker.drop_rate() > 0.5,
        "drop rate {} with a 300ms backend",
        tracker.drop_rate()
    );
    assert!(tracker.frames_processed() >= 1);
    assert!(tracker.dropped_by(DropReason::StaleSkip) > 0);
    assert_eq!(
        tracker.frames_processed() + tracker.frames_dropped(),
        tracker.frames_captured()
    );
}

#[test]
fn backend_switch_never_hands_old_frames_to_new_backend() {
    let old = SleepBackend::new("old", 80);
    let new = SleepBackend::new("new", 5);
    let new_seen = new.seen.clone();
    let mut pipeline = Pipeline::new(Box::new(old), Box::new(LogOverlay), settings(5));
    let (sender, source) = channel(8);
    pipeline.start(Box::new(source)).unwrap();

    for ts in 1..=4 {
        assert!(sender.send(image(ts)));
    }
    std::thread::sleep(Duration::from_millis(20));
    pipeline.switch_backend(Box::new(new));
    assert_eq!(pipeline.queue_len(), 0);
    assert_eq!(pipeline.backend_name().as_deref(), Some("new"));

    // Let the cancelled call finish and the new backend take over.
    std::thread::sleep(Duration::from_millis(150));
    for ts in 10_001..=10_003 {
        assert!(sender.send(image(ts)));
        std::thread::sleep(Duration::from_millis(30));
    }
    drop(sender);
    assert!(pipeline.wait_stopped(Duration::from_secs(5)));
    pipeline.stop().unwrap();

    let seen = new_seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|ts| *ts > 10_000), "new backend saw {:?}", seen);

    let tracker = pipeline.tracker();
    assert_eq!(tracker.frames_captured(), 7);
    let discarded =
        tracker.dropped_by(DropReason::Cancelled) + tracker.dropped_by(DropReason::Flushed);
    assert!(discarded > 0);
    assert_eq!(
        tracker.frames_processed() + tracker.frames_dropped(),
        tracker.frames_captured()
    );
}

#[test]
fn model_load_failure_stops_pipeline() {
    let mut pipeline = Pipeline::new(Box::new(BrokenModel), Box::new(LogOverlay), settings(5));
    let (sender, source) = channel(4);
    pipeline.start(Box::new(source)).unwrap();
    assert!(sender.send(image(100)));

    assert!(pipeline.wait_stopped(Duration::from_secs(2)));
    assert!(matches!(
        pipeline.stop_reason(),
        Some(StopReason::BackendFailed(msg)) if msg.contains("weights.onnx")
    ));
    let err = pipeline.stop().unwrap_err();
    assert!(err.to_string().contains("backend failed"));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.tracker().dropped_by(DropReason::BackendError), 1);

    // The failed backend is gone; a restart needs a replacement.
    let (_sender, source) = channel(1);
    assert!(pipeline.start(Box::new(source)).is_err());
    pipeline.switch_backend(Box::new(SleepBackend::new("replacement", 1)));
    let (sender, source) = channel(1);
    pipeline.start(Box::new(source)).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);
    drop(sender);
    assert!(pipeline.wait_stopped(Duration::from_secs(2)));
    pipeline.stop().unwrap();
}

#[test]
fn pause_stops_capture_until_resume() {
    let mut pipeline = Pipeline::new(
        Box::new(SleepBackend::new("sleep", 1)),
        Box::new(LogOverlay),
        settings(5),
    );
    let source =
        SyntheticSource::new("stub://test", 16, 16).with_interval(Duration::from_millis(10));
    pipeline.start(Box::new(source)).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let control = pipeline.control();
    assert!(control.visibility_changed(false));
    std::thread::sleep(Duration::from_millis(20));
    let paused_at = pipeline.tracker().frames_captured();
    assert!(paused_at > 0);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(pipeline.tracker().frames_captured(), paused_at);
    assert_eq!(pipeline.state(), PipelineState::Paused);

    assert!(control.visibility_changed(true));
    std::thread::sleep(Duration::from_millis(100));
    assert!(pipeline.tracker().frames_captured() > paused_at);

    pipeline.stop().unwrap();
    assert_eq!(pipeline.stop_reason(), Some(StopReason::Requested));
    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.queue_len, 0);
    assert_eq!(
        snapshot.stats.frames_processed + snapshot.stats.frames_dropped,
        snapshot.stats.frames_captured
    );
}

#[test]
fn older_results_never_replace_newer_overlay() {
    let rendered = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let rendered = rendered.clone();
        move |_frame: &Frame, result: &DetectionResult| {
            rendered.lock().unwrap().push(result.capture_ts);
        }
    };
    let mut pipeline = Pipeline::new(
        Box::new(RewindBackend { capture_ts: 500 }),
        Box::new(sink),
        settings(5),
    );
    let (sender, source) = channel(4);
    pipeline.start(Box::new(source)).unwrap();

    // Rendered, then a result claiming an older capture, then an old frame.
    for ts in [1_000, 2_000, 900] {
        assert!(sender.send(image(ts)));
        std::thread::sleep(Duration::from_millis(40));
    }
    drop(sender);
    assert!(pipeline.wait_stopped(Duration::from_secs(2)));
    pipeline.stop().unwrap();

    assert_eq!(*rendered.lock().unwrap(), vec![1_000]);
    let tracker = pipeline.tracker();
    assert_eq!(tracker.frames_processed(), 1);
    assert_eq!(tracker.dropped_by(DropReason::StaleResult), 1);
    assert_eq!(tracker.dropped_by(DropReason::StaleSkip), 1);
}

#[test]
fn per_frame_timeouts_cost_only_their_frame() {
    let mut pipeline = Pipeline::new(
        Box::new(FlakyBackend::default()),
        Box::new(LogOverlay),
        settings(5),
    );
    let (sender, source) = channel(4);
    pipeline.start(Box::new(source)).unwrap();

    for ts in 1..=6 {
        assert!(sender.send(image(ts * 100)));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(pipeline.state(), PipelineState::Running);
    }
    drop(sender);
    assert!(pipeline.wait_stopped(Duration::from_secs(2)));
    assert_eq!(pipeline.stop_reason(), Some(StopReason::SourceEnded));
    pipeline.stop().unwrap();

    let tracker = pipeline.tracker();
    assert_eq!(tracker.frames_captured(), 6);
    assert!(tracker.dropped_by(DropReason::Timeout) > 0);
    assert!(tracker.frames_processed() > 0);
    assert_eq!(tracker.dropped_by(DropReason::BackendError), 0);
    assert_eq!(
        tracker.frames_processed() + tracker.frames_dropped(),
        tracker.frames_captured()
    );
}

#[test]
fn clock_stepping_back_mid_session_keeps_frames_flowing() {
    let clock = Arc::new(ManualClock::new(10_000));
    let mut pipeline = Pipeline::with_clock(
        Box::new(SleepBackend::new("sleep", 1)),
        Box::new(LogOverlay),
        settings(5),
        clock.clone(),
    );
    let (sender, source) = channel(4);
    pipeline.start(Box::new(source)).unwrap();

    assert!(sender.send(CapturedImage::new(vec![0; 3], 1, 1)));
    std::thread::sleep(Duration::from_millis(40));
    clock.set(5_000);
    for _ in 0..5 {
        clock.advance(100);
        assert!(sender.send(CapturedImage::new(vec![0; 3], 1, 1)));
        std::thread::sleep(Duration::from_millis(40));
    }
    drop(sender);
    assert!(pipeline.wait_stopped(Duration::from_secs(2)));
    pipeline.stop().unwrap();

    let tracker = pipeline.tracker();
    assert_eq!(tracker.frames_captured(), 6);
    assert_eq!(tracker.dropped_by(DropReason::StaleSkip), 0);
    assert_eq!(tracker.dropped_by(DropReason::StaleResult), 0);
    assert_eq!(tracker.frames_processed(), 6);
}
