//! Events consumed by the session controller
//!
//! User commands and async sources (timer, capture pump, upload task) all
//! publish into one channel of [`SessionEvent`]s. Source events carry the
//! attempt they were started for so late deliveries can be dropped.

use crate::capture::{CaptureError, CaptureResult, StreamLease};
use crate::upload::{PredictionResult, UploadResult};

#[derive(Debug)]
pub enum SessionEvent {
    /// User asked to start recording
    Start,
    /// User stopped the recording before the countdown expired
    Stop,
    /// User wants another attempt
    Retake,
    /// User navigated away
    Back,
    /// The camera request resolved
    Acquired {
        attempt: u64,
        result: CaptureResult<StreamLease>,
    },
    /// One second of the countdown elapsed
    Tick { attempt: u64, remaining: u32 },
    /// The capture pump queued new fragments
    FragmentAvailable { attempt: u64 },
    /// The camera stream ended on its own
    StreamEnded {
        attempt: u64,
        error: Option<CaptureError>,
    },
    /// The prediction request resolved
    UploadFinished {
        attempt: u64,
        outcome: UploadResult<PredictionResult>,
    },
}

impl SessionEvent {
    /// Attempt an async source event belongs to; `None` for user commands
    pub fn attempt(&self) -> Option<u64> {
        match self {
            SessionEvent::Start | SessionEvent::Stop | SessionEvent::Retake | SessionEvent::Back => {
                None
            }
            SessionEvent::Acquired { attempt, .. }
            | SessionEvent::Tick { attempt, .. }
            | SessionEvent::FragmentAvailable { attempt }
            | SessionEvent::StreamEnded { attempt, .. }
            | SessionEvent::UploadFinished { attempt, .. } => Some(*attempt),
        }
    }
}
