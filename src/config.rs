//! Configuration loading
//!
//! Load order (later wins):
//! 1. Compiled defaults
//! 2. The file passed with `--config`, or `./vitals-capture.toml` if present
//! 3. Environment variables (`VITALS_*`)
//!
//! ```toml
//! countdown_seconds = 7
//!
//! [camera]
//! input_format = "v4l2"
//! device = "/dev/video0"
//!
//! [service]
//! base_url = "http://localhost:5000"
//! upload_timeout_secs = 30
//! ```

use crate::capture::ffmpeg::DEFAULT_FRAGMENT_BYTES;
use crate::capture::{CameraConstraints, FacingMode};
use crate::recorder::timer::DEFAULT_COUNTDOWN_SECONDS;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Local override file picked up from the working directory
pub const LOCAL_CONFIG_FILE: &str = "vitals-capture.toml";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Length of the recording window
    pub countdown_seconds: u32,

    pub camera: CameraConfig,

    pub service: ServiceConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: DEFAULT_COUNTDOWN_SECONDS,
            camera: CameraConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

/// Camera selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// ffmpeg input format
    pub input_format: String,

    /// Front-facing device
    pub device: String,

    /// Rear-facing device, if the machine has one
    pub rear_device: Option<String>,

    pub facing_mode: FacingMode,

    /// Path to the ffmpeg binary
    pub ffmpeg: String,

    /// Largest chunk read from ffmpeg as one fragment
    pub fragment_bytes: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let (input_format, device) = if cfg!(target_os = "macos") {
            ("avfoundation", "0")
        } else {
            ("v4l2", "/dev/video0")
        };
        Self {
            input_format: input_format.to_string(),
            device: device.to_string(),
            rear_device: None,
            facing_mode: FacingMode::User,
            ffmpeg: "ffmpeg".to_string(),
            fragment_bytes: DEFAULT_FRAGMENT_BYTES,
        }
    }
}

impl CameraConfig {
    /// Constraints for the device arbiter
    pub fn constraints(&self) -> CameraConstraints {
        CameraConstraints {
            facing_mode: self.facing_mode,
            audio: false,
            device_id: None,
        }
    }
}

/// Prediction backend endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub predict_path: String,
    pub history_path: String,
    pub health_path: String,

    /// Multipart field carrying the recording
    pub upload_field: String,

    /// File name attached to the recording part
    pub file_name: String,

    /// Container type of the recording
    pub mime_type: String,

    /// No limit unless set
    pub upload_timeout_secs: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            predict_path: "/predict".to_string(),
            history_path: "/get-readings".to_string(),
            health_path: "/health".to_string(),
            upload_field: "video".to_string(),
            file_name: "recording.webm".to_string(),
            mime_type: "video/webm".to_string(),
            upload_timeout_secs: None,
        }
    }
}

impl ServiceConfig {
    fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid("service.base_url", e.to_string()))?;
        base.join(path)
            .map_err(|e| ConfigError::invalid("service path", format!("{path}: {e}")))
    }

    pub fn predict_url(&self) -> Result<Url, ConfigError> {
        self.endpoint(&self.predict_path)
    }

    pub fn history_url(&self) -> Result<Url, ConfigError> {
        self.endpoint(&self.history_path)
    }

    pub fn health_url(&self) -> Result<Url, ConfigError> {
        self.endpoint(&self.health_path)
    }

    pub fn upload_timeout(&self) -> Option<Duration> {
        self.upload_timeout_secs.map(Duration::from_secs)
    }
}

impl CaptureConfig {
    /// Load from defaults, an optional file and the environment
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        let path = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None if local.exists() => Some(local),
            None => None,
        };

        let mut config = match path {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CaptureConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply `VITALS_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VITALS_SERVICE_URL") {
            self.service.base_url = url;
        }
        if let Some(device) = lookup("VITALS_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(value) = lookup("VITALS_COUNTDOWN_SECS") {
            self.countdown_seconds = value
                .parse()
                .map_err(|_| ConfigError::invalid("VITALS_COUNTDOWN_SECS", value.clone()))?;
        }
        if let Some(value) = lookup("VITALS_UPLOAD_TIMEOUT_SECS") {
            let secs: u64 = value
                .parse()
                .map_err(|_| ConfigError::invalid("VITALS_UPLOAD_TIMEOUT_SECS", value.clone()))?;
            self.service.upload_timeout_secs = (secs > 0).then_some(secs);
        }
        Ok(())
    }

    /// Reject configurations the session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.countdown_seconds == 0 {
            return Err(ConfigError::invalid(
                "countdown_seconds",
                "must be at least one second",
            ));
        }
        if self.camera.fragment_bytes == 0 {
            return Err(ConfigError::invalid("camera.fragment_bytes", "must be positive"));
        }
        self.service.predict_url()?;
        self.service.history_url()?;
        self.service.health_url()?;

        let mime = &self.service.mime_type;
        if mime.split_once('/').map_or(true, |(kind, sub)| kind.is_empty() || sub.is_empty()) {
            return Err(ConfigError::invalid("service.mime_type", mime.clone()));
        }
        if self.service.upload_field.is_empty() {
            return Err(ConfigError::invalid("service.upload_field", "must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_backend() {
        let config = CaptureConfig::default();
        assert_eq!(config.countdown_seconds, 7);
        assert_eq!(
            config.service.predict_url().unwrap().as_str(),
            "http://localhost:5000/predict"
        );
        assert_eq!(config.service.upload_timeout(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vitals.toml");
        std::fs::write(
            &path,
            r#"
countdown_seconds = 5

[service]
base_url = "http://10.0.0.2:8000"
upload_timeout_secs = 20
"#,
        )
        .unwrap();

        let config = CaptureConfig::load_from_file(&path).unwrap();
        assert_eq!(config.countdown_seconds, 5);
        assert_eq!(
            config.service.history_url().unwrap().as_str(),
            "http://10.0.0.2:8000/get-readings"
        );
        assert_eq!(config.service.upload_timeout(), Some(Duration::from_secs(20)));
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "countdown_seconds = \"seven\"").unwrap();

        match CaptureConfig::load_from_file(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("VITALS_SERVICE_URL", "http://predict.local"),
            ("VITALS_COUNTDOWN_SECS", "3"),
            ("VITALS_UPLOAD_TIMEOUT_SECS", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = CaptureConfig::default();
        config.service.upload_timeout_secs = Some(10);
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.service.base_url, "http://predict.local");
        assert_eq!(config.countdown_seconds, 3);
        assert_eq!(config.service.upload_timeout_secs, None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CaptureConfig::default();
        config.countdown_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.service.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.service.mime_type = "webm".to_string();
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.camera.fragment_bytes = 0;
        assert!(config.validate().is_err());
    }
}
