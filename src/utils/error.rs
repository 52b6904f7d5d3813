//! Error types and handling
//!
//! The session-level error taxonomy. Every failure that ends an attempt is
//! mapped into a [`SessionError`] before it reaches the `Error` state.

use crate::capture::CaptureError;
use crate::upload::UploadError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal failure of a capture attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("No compatible camera available: {0}")]
    DeviceUnavailable(String),

    #[error("Recording captured no video data")]
    EmptyRecording,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Prediction service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("Malformed prediction response: {0}")]
    Decode(String),
}

impl SessionError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied(_) => "PERMISSION_DENIED",
            SessionError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            SessionError::EmptyRecording => "EMPTY_RECORDING",
            SessionError::Network(_) => "NETWORK_ERROR",
            SessionError::Service { .. } => "SERVICE_ERROR",
            SessionError::Decode(_) => "DECODE_ERROR",
        }
    }

    /// The message shown to the user.
    ///
    /// Camera failures and prediction failures each collapse into one
    /// sentence; the full diagnostic stays in `Display` for the logs.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::PermissionDenied(_) => {
                "Failed to access camera: permission was denied.".to_string()
            }
            SessionError::DeviceUnavailable(_) => {
                "Failed to access camera: no compatible camera was found.".to_string()
            }
            SessionError::EmptyRecording => {
                "No video was captured. Please try again.".to_string()
            }
            SessionError::Network(_) | SessionError::Decode(_) => {
                "Error getting prediction. Please try again.".to_string()
            }
            SessionError::Service { message, .. } => {
                format!("Error getting prediction: {message}")
            }
        }
    }

    /// Whether the failure happened before any network call was attempted
    pub fn is_capture_failure(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied(_)
                | SessionError::DeviceUnavailable(_)
                | SessionError::EmptyRecording
        )
    }
}

impl From<CaptureError> for SessionError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied(msg) => SessionError::PermissionDenied(msg),
            CaptureError::DeviceUnavailable(msg) => SessionError::DeviceUnavailable(msg),
            CaptureError::StreamFailed(msg) => SessionError::DeviceUnavailable(msg),
        }
    }
}

impl From<UploadError> for SessionError {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::Network(msg) => SessionError::Network(msg),
            UploadError::Service { status, message } => SessionError::Service { status, message },
            UploadError::Decode(msg) => SessionError::Decode(msg),
        }
    }
}

/// Error response for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub detail: String,
}

impl From<&SessionError> for ErrorResponse {
    fn from(error: &SessionError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.user_message(),
            detail: error.to_string(),
        }
    }
}

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;
