//! live_detect - capture, detect and overlay daemon
//!
//! This daemon:
//! 1. Loads `PipelineConfig` (file + environment)
//! 2. Builds the configured backend and capture source
//! 3. Serves pipeline stats on the API address
//! 4. Logs rendered detections until Ctrl-C or a fatal error

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use live_detect::pipeline::open_source;
use live_detect::{
    build_backend, ApiConfig, LogOverlay, Pipeline, PipelineConfig, PipelineState, StatsServer,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file.
    #[arg(long, env = "LIVE_DETECT_CONFIG")]
    config: Option<PathBuf>,
    /// Do not serve the stats API.
    #[arg(long)]
    no_api: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PipelineConfig::load_from(args.config.as_deref())?;
    log::info!(
        "mode={} model={} capture={} @ {}fps queue={}",
        config.backend.mode,
        config.backend.model_name,
        config.capture.url,
        config.capture.target_fps,
        config.queue_capacity
    );

    let backend = build_backend(&config).map_err(|err| anyhow!("backend unavailable: {}", err))?;
    let source = open_source(&config.capture)?;
    let mut pipeline = Pipeline::new(backend, Box::new(LogOverlay), config.pipeline_settings());

    let api_handle = if args.no_api {
        None
    } else {
        let handle = StatsServer::new(
            ApiConfig {
                addr: config.api_addr.clone(),
            },
            pipeline.control(),
        )
        .spawn()?;
        log::info!("stats api listening on {}", handle.addr);
        Some(handle)
    };

    pipeline.start(source)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    log::info!("live_detect running; waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping pipeline...");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        let snapshot = pipeline.snapshot();
        let total = snapshot.stats.total;
        log::info!(
            "health state={} processed={} dropped={} drop_rate={:.2} total_p50={} total_p95={} queue={}",
            snapshot.state.as_str(),
            snapshot.stats.frames_processed,
            snapshot.stats.frames_dropped,
            snapshot.stats.drop_rate,
            total.map_or("-".to_string(), |p| format!("{}ms", p.median_ms)),
            total.map_or("-".to_string(), |p| format!("{}ms", p.p95_ms)),
            snapshot.queue_len
        );
        if snapshot.state == PipelineState::Stopped {
            break;
        }
    }

    let result = pipeline.stop();
    if let Some(handle) = api_handle {
        handle.stop()?;
    }
    result
}
