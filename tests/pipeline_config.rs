use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use live_detect::{BackendKind, PipelineConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LIVE_DETECT_CONFIG",
        "LIVE_DETECT_MODE",
        "LIVE_DETECT_MODEL",
        "LIVE_DETECT_RESOLUTION",
        "LIVE_DETECT_REMOTE_URL",
        "LIVE_DETECT_CAPTURE_URL",
        "LIVE_DETECT_QUEUE_CAPACITY",
        "LIVE_DETECT_TIMEOUT_MS",
        "LIVE_DETECT_API_ADDR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "capture": {
                "url": "http://camera-1/snapshot.jpg",
                "target_fps": 10,
                "width": 800,
                "height": 600
            },
            "queue": { "capacity": 3 },
            "backend": {
                "mode": "on_device",
                "model_name": "motion",
                "resolution": [320, 320],
                "jpeg_quality": 70
            },
            "latency": { "window": 120 },
            "api": { "addr": "127.0.0.1:9100" }
        }"#,
    );

    std::env::set_var("LIVE_DETECT_CONFIG", file.path());
    std::env::set_var("LIVE_DETECT_MODE", "remote");
    std::env::set_var("LIVE_DETECT_REMOTE_URL", "http://10.0.0.5:8000/");
    std::env::set_var("LIVE_DETECT_TIMEOUT_MS", "250");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.capture.url, "http://camera-1/snapshot.jpg");
    assert_eq!(cfg.capture.target_fps, 10);
    assert_eq!(cfg.capture.width, 800);
    assert_eq!(cfg.capture.height, 600);
    assert_eq!(cfg.queue_capacity, 3);
    assert_eq!(cfg.latency_window, 120);
    assert_eq!(cfg.api_addr, "127.0.0.1:9100");
    assert_eq!(cfg.backend.mode, BackendKind::Remote);
    assert_eq!(cfg.backend.resolution, [320, 320]);
    assert_eq!(cfg.backend.jpeg_quality, 70);
    assert_eq!(cfg.request_timeout(), Duration::from_millis(250));

    let remote = cfg.remote_settings().expect("remote settings");
    assert_eq!(remote.endpoint, "http://10.0.0.5:8000/");
    assert_eq!(remote.timeout, Duration::from_millis(250));
    assert_eq!(remote.model_name, "motion");

    let settings = cfg.pipeline_settings();
    assert_eq!(settings.queue_capacity, 3);
    assert_eq!(settings.latency_window, 120);

    clear_env();
}

#[test]
fn defaults_without_file_follow_capture_cadence() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load_from(None).expect("defaults");
    assert_eq!(cfg.capture.url, "stub://camera");
    assert_eq!(cfg.backend.mode, BackendKind::OnDevice);
    assert_eq!(cfg.backend.model_name, "motion");
    assert_eq!(cfg.request_timeout(), cfg.capture.frame_interval());

    std::env::set_var("LIVE_DETECT_CAPTURE_URL", "stub://lobby");
    std::env::set_var("LIVE_DETECT_QUEUE_CAPACITY", "8");
    std::env::set_var("LIVE_DETECT_RESOLUTION", "416x416");
    let cfg = PipelineConfig::load_from(None).expect("env only");
    assert_eq!(cfg.capture.url, "stub://lobby");
    assert_eq!(cfg.queue_capacity, 8);
    assert_eq!(cfg.backend.resolution, [416, 416]);

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "queue": { "capacity": 0 } }"#);
    assert!(PipelineConfig::load_from(Some(file.path())).is_err());

    let file = write_config(r#"{ "backend": { "mode": "remote" } }"#);
    let err = PipelineConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("remote_url"), "{}", err);

    let file = write_config(r#"{ "backend": { "mode": "cloud" } }"#);
    assert!(PipelineConfig::load_from(Some(file.path())).is_err());

    let file = write_config("{ not json");
    assert!(PipelineConfig::load_from(Some(file.path())).is_err());

    std::env::set_var("LIVE_DETECT_QUEUE_CAPACITY", "many");
    assert!(PipelineConfig::load_from(None).is_err());

    clear_env();
}
