//! Camera capture through an ffmpeg subprocess
//!
//! ffmpeg reads the camera and writes a live WebM stream to stdout. Each read
//! from the pipe becomes one fragment, which makes the process behave like a
//! browser media recorder emitting data chunks.

use super::traits::{
    CameraConstraints, CameraDevice, CameraInfo, CaptureError, CaptureResult, FacingMode,
    MediaStream,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Default read size for one fragment
pub const DEFAULT_FRAGMENT_BYTES: usize = 64 * 1024;

/// Get list of available cameras
pub fn list_cameras() -> Vec<CameraInfo> {
    let entries = match std::fs::read_dir("/dev") {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            return Vec::new();
        }
    };

    let mut cameras: Vec<CameraInfo> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.starts_with("video") {
                return None;
            }
            let id = entry.path().to_string_lossy().to_string();
            let name = std::fs::read_to_string(format!("/sys/class/video4linux/{file_name}/name"))
                .map(|name| name.trim().to_string())
                .unwrap_or_else(|_| file_name.clone());
            Some(CameraInfo { id, name })
        })
        .collect();

    cameras.sort_by(|a, b| a.id.cmp(&b.id));
    cameras
}

/// Map ffmpeg's diagnostic output to a capture error
pub fn classify_failure(stderr: &str) -> CaptureError {
    let detail = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("capture process exited without output")
        .to_string();

    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("permission denied") || lowered.contains("operation not permitted") {
        CaptureError::PermissionDenied(detail)
    } else {
        CaptureError::DeviceUnavailable(detail)
    }
}

/// A camera read through ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegCamera {
    ffmpeg: String,
    input_format: String,
    front_device: String,
    rear_device: Option<String>,
    fragment_bytes: usize,
}

impl FfmpegCamera {
    /// Create a camera reading `front_device` with the given ffmpeg input
    /// format (`v4l2` on Linux, `avfoundation` on macOS)
    pub fn new(input_format: impl Into<String>, front_device: impl Into<String>) -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            input_format: input_format.into(),
            front_device: front_device.into(),
            rear_device: None,
            fragment_bytes: DEFAULT_FRAGMENT_BYTES,
        }
    }

    /// Device used when the rear camera is requested
    pub fn with_rear_device(mut self, device: Option<String>) -> Self {
        self.rear_device = device;
        self
    }

    /// Path to the ffmpeg binary
    pub fn with_ffmpeg(mut self, ffmpeg: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self
    }

    /// Maximum size of a single fragment
    pub fn with_fragment_bytes(mut self, bytes: usize) -> Self {
        self.fragment_bytes = bytes.max(1);
        self
    }

    fn select_device<'a>(&'a self, constraints: &'a CameraConstraints) -> &'a str {
        if let Some(id) = constraints.device_id.as_deref() {
            return id;
        }
        match (constraints.facing_mode, self.rear_device.as_deref()) {
            (FacingMode::Environment, Some(rear)) => rear,
            _ => &self.front_device,
        }
    }

    fn command(&self, device: &str, audio: bool) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command.args(["-hide_banner", "-loglevel", "error"]);
        command.args(["-f", self.input_format.as_str(), "-i", device]);
        if !audio {
            command.arg("-an");
        }
        command.args([
            "-c:v",
            "libvpx",
            "-deadline",
            "realtime",
            "-cpu-used",
            "8",
            "-f",
            "webm",
            "pipe:1",
        ]);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl CameraDevice for FfmpegCamera {
    async fn open(&self, constraints: &CameraConstraints) -> CaptureResult<Box<dyn MediaStream>> {
        let device = self.select_device(constraints).to_string();

        if device.starts_with("/dev/") && !Path::new(&device).exists() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{device} does not exist"
            )));
        }

        let mut child = self.command(&device, constraints.audio).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CaptureError::DeviceUnavailable(format!("{} not found", self.ffmpeg))
            } else {
                CaptureError::DeviceUnavailable(format!("failed to start {}: {}", self.ffmpeg, e))
            }
        })?;

        let Some(stdout) = child.stdout.take() else {
            return Err(CaptureError::DeviceUnavailable(
                "capture process has no stdout".to_string(),
            ));
        };

        tracing::info!(
            "Started ffmpeg capture: format={}, device={}",
            self.input_format,
            device
        );

        let mut stream = FfmpegStream {
            label: device,
            child,
            stdout,
            fragment_bytes: self.fragment_bytes,
            pending: None,
            stopped: false,
        };

        // The device only counts as acquired once it delivers data; an early
        // exit is where denied access and missing hardware show up.
        match stream.read_fragment().await {
            Ok(Some(first)) => {
                stream.pending = Some(first);
                // A full stderr pipe would stall ffmpeg mid-recording
                if let Some(stderr) = stream.child.stderr.take() {
                    tokio::spawn(drain_diagnostics(stream.label.clone(), stderr));
                }
                Ok(Box::new(stream))
            }
            Ok(None) => Err(stream.failure().await),
            Err(e) => {
                stream.stop().await;
                Err(e)
            }
        }
    }
}

/// Forward ffmpeg's diagnostics to the log until the process exits
async fn drain_diagnostics(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!("ffmpeg [{}]: {}", label, line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Stopped reading ffmpeg stderr for {}: {}", label, e);
                break;
            }
        }
    }
}

/// Stream backed by a running ffmpeg process
struct FfmpegStream {
    label: String,
    child: Child,
    stdout: ChildStdout,
    fragment_bytes: usize,
    pending: Option<Bytes>,
    stopped: bool,
}

impl FfmpegStream {
    async fn read_fragment(&mut self) -> CaptureResult<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(self.fragment_bytes);
        let read = self
            .stdout
            .read_buf(&mut buf)
            .await
            .map_err(|e| CaptureError::StreamFailed(e.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }

    async fn failure(&mut self) -> CaptureError {
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            if let Err(e) = pipe.read_to_string(&mut stderr).await {
                tracing::debug!("Could not read ffmpeg stderr: {}", e);
            }
        }
        self.stop().await;
        classify_failure(&stderr)
    }
}

#[async_trait]
impl MediaStream for FfmpegStream {
    fn label(&self) -> &str {
        &self.label
    }

    fn mime_type(&self) -> &str {
        "video/webm"
    }

    async fn next_fragment(&mut self) -> CaptureResult<Option<Bytes>> {
        if let Some(first) = self.pending.take() {
            return Ok(Some(first));
        }
        self.read_fragment().await
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Err(e) = self.child.start_kill() {
            tracing::debug!("ffmpeg already exited: {}", e);
        }
        match self.child.wait().await {
            Ok(status) => tracing::debug!("ffmpeg capture exited with {}", status),
            Err(e) => tracing::warn!("Failed to reap ffmpeg capture: {}", e),
        }
    }
}
