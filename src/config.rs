use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_API_ADDR;
use crate::codec::DEFAULT_JPEG_QUALITY;
use crate::detect::backend::BackendKind;
use crate::detect::backends::remote::{RemoteSettings, DEFAULT_MAX_CONNECTION_FAILURES};
use crate::detect::models::motion;
use crate::latency::DEFAULT_WINDOW;
use crate::pipeline::PipelineSettings;
use crate::queue::DEFAULT_CAPACITY;
use crate::transport::wire::DEFAULT_RESOLUTION;

pub const CONFIG_ENV: &str = "LIVE_DETECT_CONFIG";

const DEFAULT_CAPTURE_URL: &str = "stub://camera";
const DEFAULT_CAPTURE_FPS: u32 = 15;
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    capture: Option<CaptureConfigFile>,
    queue: Option<QueueConfigFile>,
    backend: Option<BackendConfigFile>,
    latency: Option<LatencyConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    mode: Option<String>,
    model_name: Option<String>,
    resolution: Option<[u32; 2]>,
    remote_url: Option<String>,
    request_timeout_ms: Option<u64>,
    max_connection_failures: Option<u32>,
    jpeg_quality: Option<u8>,
    models_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct LatencyConfigFile {
    window: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub capture: CaptureSettings,
    pub queue_capacity: usize,
    pub backend: BackendSettings,
    pub latency_window: usize,
    pub api_addr: String,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl CaptureSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.target_fps.max(1)))
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub mode: BackendKind,
    pub model_name: String,
    pub resolution: [u32; 2],
    pub remote_url: Option<String>,
    /// `None` means one frame interval at the capture rate.
    pub request_timeout: Option<Duration>,
    pub max_connection_failures: u32,
    pub jpeg_quality: u8,
    pub models_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load from the file named by `LIVE_DETECT_CONFIG`, if set.
    pub fn load() -> Result<Self> {
        let config_path = env_value(CONFIG_ENV).map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (or defaults), then apply the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            url: capture_file
                .url
                .unwrap_or_else(|| DEFAULT_CAPTURE_URL.to_string()),
            target_fps: capture_file.target_fps.unwrap_or(DEFAULT_CAPTURE_FPS),
            width: capture_file.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
            height: capture_file.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
        };
        let backend_file = file.backend.unwrap_or_default();
        let mode = match backend_file.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => BackendKind::OnDevice,
        };
        let backend = BackendSettings {
            mode,
            model_name: backend_file
                .model_name
                .unwrap_or_else(|| motion::MODEL_NAME.to_string()),
            resolution: backend_file.resolution.unwrap_or(DEFAULT_RESOLUTION),
            remote_url: backend_file.remote_url,
            request_timeout: backend_file.request_timeout_ms.map(Duration::from_millis),
            max_connection_failures: backend_file
                .max_connection_failures
                .unwrap_or(DEFAULT_MAX_CONNECTION_FAILURES),
            jpeg_quality: backend_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            models_dir: backend_file.models_dir,
        };
        Ok(Self {
            capture,
            queue_capacity: file
                .queue
                .and_then(|queue| queue.capacity)
                .unwrap_or(DEFAULT_CAPACITY),
            backend,
            latency_window: file
                .latency
                .and_then(|latency| latency.window)
                .unwrap_or(DEFAULT_WINDOW),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(mode) = env_value("LIVE_DETECT_MODE") {
            self.backend.mode = mode.parse()?;
        }
        if let Some(model) = env_value("LIVE_DETECT_MODEL") {
            self.backend.model_name = model;
        }
        if let Some(resolution) = env_value("LIVE_DETECT_RESOLUTION") {
            self.backend.resolution = parse_resolution(&resolution)?;
        }
        if let Some(url) = env_value("LIVE_DETECT_REMOTE_URL") {
            self.backend.remote_url = Some(url);
        }
        if let Some(url) = env_value("LIVE_DETECT_CAPTURE_URL") {
            self.capture.url = url;
        }
        if let Some(capacity) = env_value("LIVE_DETECT_QUEUE_CAPACITY") {
            self.queue_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("LIVE_DETECT_QUEUE_CAPACITY must be a positive integer"))?;
        }
        if let Some(timeout) = env_value("LIVE_DETECT_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("LIVE_DETECT_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.backend.request_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(addr) = env_value("LIVE_DETECT_API_ADDR") {
            self.api_addr = addr;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue capacity must be at least 1"));
        }
        if self.capture.target_fps == 0 {
            return Err(anyhow!("capture target_fps must be at least 1"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be non-zero"));
        }
        if self.backend.resolution.contains(&0) {
            return Err(anyhow!("backend resolution must be non-zero"));
        }
        if self.latency_window == 0 {
            return Err(anyhow!("latency window must be at least 1"));
        }
        if !(1..=100).contains(&self.backend.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be in 1..=100"));
        }
        if self.backend.request_timeout == Some(Duration::ZERO) {
            return Err(anyhow!("request timeout must be greater than zero"));
        }
        self.backend.model_name = self.backend.model_name.trim().to_string();
        if self.backend.model_name.is_empty() {
            return Err(anyhow!("model_name must not be empty"));
        }
        if self.backend.mode == BackendKind::Remote {
            let url = self
                .backend
                .remote_url
                .as_deref()
                .map(str::trim)
                .unwrap_or("");
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!(
                    "remote mode requires an http:// or https:// remote_url, got '{}'",
                    url
                ));
            }
        }
        Ok(())
    }

    /// Per-request deadline for remote inference.
    pub fn request_timeout(&self) -> Duration {
        self.backend
            .request_timeout
            .unwrap_or_else(|| self.capture.frame_interval())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            queue_capacity: self.queue_capacity,
            latency_window: self.latency_window,
            ..PipelineSettings::default()
        }
    }

    pub fn remote_settings(&self) -> Result<RemoteSettings> {
        let endpoint = self
            .backend
            .remote_url
            .clone()
            .ok_or_else(|| anyhow!("remote_url is not configured"))?;
        Ok(RemoteSettings {
            endpoint,
            model_name: self.backend.model_name.clone(),
            resolution: self.backend.resolution,
            timeout: self.request_timeout(),
            max_connection_failures: self.backend.max_connection_failures,
            jpeg_quality: self.backend.jpeg_quality,
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings {
                url: DEFAULT_CAPTURE_URL.to_string(),
                target_fps: DEFAULT_CAPTURE_FPS,
                width: DEFAULT_CAPTURE_WIDTH,
                height: DEFAULT_CAPTURE_HEIGHT,
            },
            queue_capacity: DEFAULT_CAPACITY,
            backend: BackendSettings {
                mode: BackendKind::OnDevice,
                model_name: motion::MODEL_NAME.to_string(),
                resolution: DEFAULT_RESOLUTION,
                remote_url: None,
                request_timeout: None,
                max_connection_failures: DEFAULT_MAX_CONNECTION_FAILURES,
                jpeg_quality: DEFAULT_JPEG_QUALITY,
                models_dir: None,
            },
            latency_window: DEFAULT_WINDOW,
            api_addr: DEFAULT_API_ADDR.to_string(),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Parse `WxH` or `W,H` into a resolution.
pub fn parse_resolution(value: &str) -> Result<[u32; 2]> {
    let parts: Vec<&str> = value
        .split(|c| c == 'x' || c == 'X' || c == ',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    match parts.as_slice() {
        [w, h] => {
            let w: u32 = w
                .parse()
                .map_err(|_| anyhow!("invalid resolution width '{}'", w))?;
            let h: u32 = h
                .parse()
                .map_err(|_| anyhow!("invalid resolution height '{}'", h))?;
            if w == 0 || h == 0 {
                return Err(anyhow!("resolution must be non-zero"));
            }
            Ok([w, h])
        }
        _ => Err(anyhow!("resolution must look like 256x256, got '{}'", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let mut cfg = PipelineConfig::from_file(PipelineConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.queue_capacity, 5);
        assert_eq!(cfg.latency_window, 500);
        assert_eq!(cfg.backend.mode, BackendKind::OnDevice);
        assert_eq!(cfg.request_timeout(), Duration::from_millis(1000 / 15));
    }

    #[test]
    fn remote_mode_requires_http_url() {
        let mut cfg = PipelineConfig::default();
        cfg.backend.mode = BackendKind::Remote;
        assert!(cfg.validate().is_err());
        cfg.backend.remote_url = Some("ftp://host".into());
        assert!(cfg.validate().is_err());
        cfg.backend.remote_url = Some("http://127.0.0.1:8000".into());
        cfg.validate().unwrap();
        assert_eq!(cfg.remote_settings().unwrap().endpoint, "http://127.0.0.1:8000");
    }

    #[test]
    fn rejects_zero_capacity_and_bad_quality() {
        let mut cfg = PipelineConfig::default();
        cfg.queue_capacity = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = PipelineConfig::default();
        cfg.backend.jpeg_quality = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_resolutions() {
        assert_eq!(parse_resolution("320x240").unwrap(), [320, 240]);
        assert_eq!(parse_resolution("640, 640").unwrap(), [640, 640]);
        assert!(parse_resolution("0x10").is_err());
        assert!(parse_resolution("wide").is_err());
    }
}
