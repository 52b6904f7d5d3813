//! Session state management
//!
//! Defines the capture state machine and the owned session it drives.

use super::chunks::FinalPayload;
use crate::capture::StreamLease;
use crate::upload::PredictionResult;
use crate::utils::SessionError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Current state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Waiting for the user to start
    Idle,
    /// Waiting for camera access
    Acquiring,
    /// Camera live, countdown running
    Recording,
    /// Building the payload from the captured fragments
    Finalizing,
    /// Payload submitted, waiting for the prediction
    Uploading,
    /// Prediction received
    Results,
    /// The attempt failed
    Error,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Acquiring)
                | (Acquiring, Recording)
                | (Acquiring, Error)
                | (Recording, Finalizing)
                | (Recording, Error)
                | (Finalizing, Uploading)
                | (Finalizing, Error)
                | (Uploading, Results)
                | (Uploading, Error)
                | (Results, Idle)
                | (Error, Idle)
        )
    }

    /// Terminal for the current attempt; only a retake leaves it
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Results | SessionState::Error)
    }

    /// Text shown for this state
    pub fn status_text(self) -> &'static str {
        match self {
            SessionState::Idle => "Start Recording",
            SessionState::Acquiring => "Waiting for camera access...",
            SessionState::Recording => "Recording...",
            SessionState::Finalizing => "Finishing recording...",
            SessionState::Uploading => "Processing video and estimating blood pressure...",
            SessionState::Results => "Blood Pressure Results",
            SessionState::Error => "Error",
        }
    }
}

/// Rejected state change
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// The single live capture session.
///
/// Owned by the controller and lent by `&mut` to the arbiter, recorder and
/// upload coordinator; nothing else holds session state.
#[derive(Debug)]
pub struct CaptureSession {
    id: Uuid,
    attempt: u64,
    state: SessionState,
    trail: Vec<SessionState>,
    started_at: Option<DateTime<Utc>>,

    /// Exclusive camera lease
    pub(crate) stream: Option<StreamLease>,

    /// Seconds left in the recording window
    pub(crate) countdown_seconds: u32,

    /// Fragments captured so far, in emission order
    pub(crate) recorded_chunks: Vec<Bytes>,

    pub(crate) final_payload: Option<FinalPayload>,
    last_error: Option<SessionError>,
    result: Option<PredictionResult>,
}

impl CaptureSession {
    /// Create a fresh session in `Idle`
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt: 0,
            state: SessionState::Idle,
            trail: vec![SessionState::Idle],
            started_at: None,
            stream: None,
            countdown_seconds: 0,
            recorded_chunks: Vec::new(),
            final_payload: None,
            last_error: None,
            result: None,
        }
    }

    /// Fresh session replacing `previous`.
    ///
    /// Keeps counting attempts so events addressed to the discarded session
    /// stay stale.
    pub(crate) fn following(previous: &CaptureSession) -> Self {
        Self {
            attempt: previous.attempt + 1,
            ..Self::new()
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Attempt counter; every async event is tagged with it
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// States visited during the current attempt, starting with `Idle`
    pub fn trail(&self) -> &[SessionState] {
        &self.trail
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn countdown_seconds(&self) -> u32 {
        self.countdown_seconds
    }

    pub fn holds_camera(&self) -> bool {
        self.stream.is_some()
    }

    pub fn recorded_chunks(&self) -> &[Bytes] {
        &self.recorded_chunks
    }

    pub fn final_payload(&self) -> Option<&FinalPayload> {
        self.final_payload.as_ref()
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn result(&self) -> Option<&PredictionResult> {
        self.result.as_ref()
    }

    /// Move to `next` if the state machine allows it
    pub fn transition(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if self.state == SessionState::Idle {
            self.started_at = Some(Utc::now());
        }
        self.state = next;
        self.trail.push(next);
        Ok(())
    }

    /// Append a fragment. Refused outside `Recording` or once sealed.
    pub(crate) fn append_chunk(&mut self, chunk: Bytes) -> bool {
        if self.state != SessionState::Recording || self.final_payload.is_some() {
            return false;
        }
        self.recorded_chunks.push(chunk);
        true
    }

    /// Store the prediction, clearing any error
    pub(crate) fn set_result(&mut self, result: PredictionResult) {
        self.last_error = None;
        self.result = Some(result);
    }

    /// Store the failure, clearing any partial result
    pub(crate) fn set_error(&mut self, error: SessionError) {
        self.result = None;
        self.last_error = Some(error);
    }

    /// Return to `Idle` for a new attempt.
    ///
    /// Only valid from a terminal state; the camera lease must already be
    /// released by the arbiter.
    pub(crate) fn reset_for_retake(&mut self) -> Result<(), InvalidTransition> {
        self.transition(SessionState::Idle)?;
        self.attempt += 1;
        self.trail = vec![SessionState::Idle];
        self.started_at = None;
        self.countdown_seconds = 0;
        self.recorded_chunks.clear();
        self.final_payload = None;
        self.last_error = None;
        self.result = None;
        Ok(())
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}
