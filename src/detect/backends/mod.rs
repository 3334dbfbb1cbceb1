pub mod on_device;
pub mod remote;

pub use on_device::OnDeviceBackend;
pub use remote::{RemoteBackend, RemoteSettings};

use crate::config::PipelineConfig;
use crate::detect::backend::{BackendKind, InferenceBackend};
use crate::detect::error::BackendError;

/// Construct the backend selected by configuration.
///
/// Construction errors are fatal: a missing model or an unreachable server
/// never yields a backend.
pub fn build_backend(config: &PipelineConfig) -> Result<Box<dyn InferenceBackend>, BackendError> {
    let settings = &config.backend;
    match settings.mode {
        BackendKind::OnDevice => {
            let backend = OnDeviceBackend::new(
                &settings.model_name,
                settings.resolution,
                settings.models_dir.as_deref(),
            )?;
            Ok(Box::new(backend))
        }
        BackendKind::Remote => {
            let remote = config
                .remote_settings()
                .map_err(|err| BackendError::Unreachable(format!("{:#}", err)))?;
            Ok(Box::new(RemoteBackend::connect(remote)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_on_device_backend() {
        let backend = build_backend(&PipelineConfig::default()).unwrap();
        assert_eq!(backend.kind(), BackendKind::OnDevice);
        assert_eq!(backend.name(), "on_device:motion");
    }

    #[test]
    fn remote_without_url_is_fatal() {
        let mut config = PipelineConfig::default();
        config.backend.mode = BackendKind::Remote;
        let err = build_backend(&config).err().expect("no url");
        assert!(err.is_fatal());
    }
}
