//! Capture trait definitions
//!
//! Platform-agnostic seams for camera access. A [`CameraDevice`] hands out a
//! [`MediaStream`] that yields encoded fragments of a single container.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capture-layer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Stream failed: {0}")]
    StreamFailed(String),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Which way the requested camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, pointing at the user
    User,
    /// Rear camera
    Environment,
}

impl Default for FacingMode {
    fn default() -> Self {
        Self::User
    }
}

/// Constraints passed to [`CameraDevice::open`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConstraints {
    /// Preferred facing mode
    pub facing_mode: FacingMode,

    /// Capture audio alongside video
    pub audio: bool,

    /// Explicit device ID, overrides the facing preference
    pub device_id: Option<String>,
}

/// Information about a camera/webcam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,
}

/// A source of camera streams.
///
/// `open` is the permission-prompt suspension point: it resolves once the
/// device is actually delivering data, or fails with
/// [`CaptureError::PermissionDenied`] / [`CaptureError::DeviceUnavailable`].
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Open a new stream honoring `constraints`
    async fn open(&self, constraints: &CameraConstraints) -> CaptureResult<Box<dyn MediaStream>>;
}

/// A live camera stream producing container fragments
#[async_trait]
pub trait MediaStream: Send {
    /// Human readable label of the underlying device
    fn label(&self) -> &str;

    /// MIME type of the container the fragments belong to
    fn mime_type(&self) -> &str;

    /// Next fragment in emission order, `Ok(None)` once the stream ended.
    ///
    /// Must be cancel safe: the recorder drops this future when it stops.
    async fn next_fragment(&mut self) -> CaptureResult<Option<Bytes>>;

    /// Stop every track. Calling it more than once is a no-op.
    async fn stop(&mut self);
}
