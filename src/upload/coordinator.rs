//! Upload coordination
//!
//! Runs the single submission of an attempt in the background and turns its
//! outcome back into session state.

use super::client::PredictionService;
use super::types::{PredictionResult, UploadResult};
use crate::recorder::{CaptureSession, SessionEvent, SessionState};
use crate::utils::{SessionError, SessionResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct UploadCoordinator {
    service: Arc<dyn PredictionService>,
    in_flight: Option<JoinHandle<()>>,
    submitted_attempt: Option<u64>,
}

impl UploadCoordinator {
    pub fn new(service: Arc<dyn PredictionService>) -> Self {
        Self {
            service,
            in_flight: None,
            submitted_attempt: None,
        }
    }

    /// Whether a submission is waiting for its outcome
    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start the one submission for the session's payload.
    ///
    /// The outcome arrives later as [`SessionEvent::UploadFinished`].
    pub fn submit(
        &mut self,
        session: &CaptureSession,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> SessionResult<()> {
        let attempt = session.attempt();
        let Some(payload) = session.final_payload().cloned() else {
            return Err(SessionError::EmptyRecording);
        };
        if session.state() != SessionState::Uploading {
            tracing::warn!("Upload requested while {:?}", session.state());
            return Ok(());
        }
        if self.is_pending() || self.submitted_attempt == Some(attempt) {
            tracing::warn!("Upload for attempt {} already submitted", attempt);
            return Ok(());
        }

        tracing::info!("Uploading {} bytes (attempt {})", payload.len(), attempt);
        let service = self.service.clone();
        let handle = tokio::spawn(async move {
            let outcome = service.submit(&payload).await;
            let _ = events.send(SessionEvent::UploadFinished { attempt, outcome });
        });

        self.in_flight = Some(handle);
        self.submitted_attempt = Some(attempt);
        Ok(())
    }

    /// Accept the outcome of the in-flight submission
    pub fn complete(
        &mut self,
        outcome: UploadResult<PredictionResult>,
    ) -> SessionResult<PredictionResult> {
        self.in_flight = None;
        outcome.map_err(SessionError::from)
    }

    /// Abandon a pending submission; its outcome will never be delivered
    pub fn abort(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
            tracing::debug!("Pending upload aborted");
        }
    }

    /// Forget the previous attempt so a retake can submit again
    pub fn reset(&mut self) {
        self.abort();
        self.submitted_attempt = None;
    }
}

impl Drop for UploadCoordinator {
    fn drop(&mut self) {
        self.abort();
    }
}
