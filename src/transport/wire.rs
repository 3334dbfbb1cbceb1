//! JSON bodies exchanged between `RemoteBackend` and `DetectServer`.

use serde::{Deserialize, Serialize};

use crate::detect::models::motion;
use crate::detect::result::Detection;

pub const DEFAULT_RESOLUTION: [u32; 2] = [256, 256];

fn default_model_name() -> String {
    motion::MODEL_NAME.to_string()
}

fn default_resolution() -> [u32; 2] {
    DEFAULT_RESOLUTION
}

/// `POST /detect` request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectRequest {
    /// Decimal frame id, echoed back in the response.
    pub frame_id: String,
    pub capture_ts: i64,
    /// `data:image/jpeg;base64,...`
    pub image_data: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_resolution")]
    pub resolution: [u32; 2],
}

/// `POST /detect` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
    pub frame_id: String,
    pub capture_ts: i64,
    pub recv_ts: i64,
    pub inference_ts: i64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerHealth {
    pub status: String,
    pub current_model: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<String>,
}
