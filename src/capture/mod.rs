//! Camera capture
//!
//! The device seam, the arbiter that owns the single camera lease, and the
//! ffmpeg-backed production camera.

pub mod arbiter;
pub mod ffmpeg;
pub mod traits;

pub use arbiter::{ArbiterStats, DeviceArbiter, StreamLease};
pub use ffmpeg::{list_cameras, FfmpegCamera};
pub use traits::{
    CameraConstraints, CameraDevice, CameraInfo, CaptureError, CaptureResult, FacingMode,
    MediaStream,
};
