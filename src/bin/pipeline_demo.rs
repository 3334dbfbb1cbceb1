//! pipeline_demo - synthetic run showing queue behavior under a slow backend

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use live_detect::detect::models::{Detector, MotionDetector};
use live_detect::latency::DropReason;
use live_detect::pipeline::SyntheticSource;
use live_detect::{
    BackendError, Detection, OnDeviceBackend, OverlaySink, Percentiles, Pipeline,
    PipelineSettings, PipelineState,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Run length in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Synthetic capture rate.
    #[arg(long, default_value_t = 15)]
    fps: u32,
    /// Simulated inference time per frame, in milliseconds.
    #[arg(long, default_value_t = 40)]
    backend_ms: u64,
    /// Queue capacity.
    #[arg(long, default_value_t = 5)]
    capacity: usize,
    /// Frame width.
    #[arg(long, default_value_t = 320)]
    width: u32,
    /// Frame height.
    #[arg(long, default_value_t = 240)]
    height: u32,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

/// Motion detection padded to a fixed inference time.
struct SlowMotion {
    inner: MotionDetector,
    delay: Duration,
}

impl Detector for SlowMotion {
    fn name(&self) -> &str {
        "motion (simulated)"
    }

    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, BackendError> {
        std::thread::sleep(self.delay);
        self.inner.detect(pixels, width, height)
    }
}

/// Counts rendered frames that carried at least one box.
struct CountingOverlay {
    with_boxes: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl OverlaySink for CountingOverlay {
    fn render(&mut self, _frame: &live_detect::Frame, result: &live_detect::DetectionResult) {
        if !result.is_empty() {
            self.with_boxes
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.capacity == 0 {
        return Err(anyhow!("capacity must be >= 1"));
    }
    let ui = ui::Ui::from_args(&args.ui, std::io::stderr().is_terminal());

    let with_boxes = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
    let mut pipeline = {
        let _stage = ui.stage("Load model");
        let backend = OnDeviceBackend::from_detector(Box::new(SlowMotion {
            inner: MotionDetector::new(),
            delay: Duration::from_millis(args.backend_ms),
        }));
        Pipeline::new(
            Box::new(backend),
            Box::new(CountingOverlay {
                with_boxes: with_boxes.clone(),
            }),
            PipelineSettings {
                queue_capacity: args.capacity,
                ..PipelineSettings::default()
            },
        )
    };

    let interval = Duration::from_millis(1000 / u64::from(args.fps));
    let source = SyntheticSource::new("stub://demo", args.width, args.height)
        .with_interval(interval)
        .with_max_frames(args.seconds.saturating_mul(u64::from(args.fps)));

    let run_for = Duration::from_secs(args.seconds);
    {
        let _stage = ui.stage("Run pipeline");
        let mut progress = ui.run(run_for);
        pipeline.start(Box::new(source))?;
        let started = Instant::now();
        while started.elapsed() < run_for && pipeline.state() != PipelineState::Stopped {
            std::thread::sleep(Duration::from_millis(100));
            let tracker = pipeline.tracker();
            progress.update(
                started.elapsed(),
                &format!(
                    "captured={} processed={} dropped={}",
                    tracker.frames_captured(),
                    tracker.frames_processed(),
                    tracker.frames_dropped()
                ),
            );
        }
        pipeline.wait_stopped(interval * 2);
        pipeline.stop()?;
        progress.finish("done");
    }

    let tracker = pipeline.tracker();
    println!("frames captured:   {}", tracker.frames_captured());
    println!("frames processed:  {}", tracker.frames_processed());
    println!(
        "frames with boxes: {}",
        with_boxes.load(std::sync::atomic::Ordering::Relaxed)
    );
    println!(
        "frames dropped:    {} ({:.1}%)",
        tracker.frames_dropped(),
        tracker.drop_rate() * 100.0
    );
    for reason in DropReason::ALL {
        let count = tracker.dropped_by(reason);
        if count > 0 {
            println!("  {:<14} {}", reason.label(), count);
        }
    }
    println!("rejected samples:  {}", tracker.rejected_samples());
    println!("network  {}", format_percentiles(tracker.network_percentiles()));
    println!("server   {}", format_percentiles(tracker.server_percentiles()));
    println!("total    {}", format_percentiles(tracker.total_percentiles()));
    Ok(())
}

fn format_percentiles(p: Option<Percentiles>) -> String {
    match p {
        Some(p) => format!("median {}ms  p95 {}ms", p.median_ms, p.p95_ms),
        None => "no samples".to_string(),
    }
}
