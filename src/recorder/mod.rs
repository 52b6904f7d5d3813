//! Capture session module
//!
//! This module implements the capture-to-result pipeline:
//! - CaptureSession and its state machine
//! - RecordingTimer for the countdown
//! - Recorder to accumulate and finalize fragments
//! - CaptureController to drive everything from one event stream

pub mod chunks;
pub mod coordinator;
pub mod events;
pub mod state;
pub mod timer;

pub use chunks::{FinalPayload, Recorder};
pub use coordinator::{
    CaptureController, NoopHooks, SessionHandle, SessionHooks, SessionSettings, SessionSnapshot,
};
pub use events::SessionEvent;
pub use state::{CaptureSession, InvalidTransition, SessionState};
pub use timer::{RecordingTimer, DEFAULT_COUNTDOWN_SECONDS};
