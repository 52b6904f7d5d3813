//! Capture session controller
//!
//! Owns the [`CaptureSession`] and drives it through the capture pipeline:
//! camera acquisition, the recording countdown, finalization and the single
//! prediction upload. All inputs arrive as [`SessionEvent`]s and are applied
//! one at a time by [`CaptureController::dispatch`].

use super::chunks::Recorder;
use super::events::SessionEvent;
use super::state::{CaptureSession, SessionState};
use super::timer::{RecordingTimer, DEFAULT_COUNTDOWN_SECONDS};
use crate::capture::{
    ArbiterStats, CameraConstraints, CameraDevice, CaptureError, CaptureResult, DeviceArbiter,
    StreamLease,
};
use crate::config::CaptureConfig;
use crate::upload::{PredictionResult, PredictionService, UploadCoordinator, UploadResult};
use crate::utils::{ErrorResponse, SessionError};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Callbacks into the embedding application
pub trait SessionHooks: Send + Sync {
    /// A prediction arrived; called once per successful attempt
    fn on_save_reading(&self, _result: &PredictionResult) {}

    /// The user left the capture screen; resources are already released
    fn on_back(&self) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {}

/// Tunables of the controller
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Length of the recording window
    pub countdown_seconds: u32,
    pub constraints: CameraConstraints,
    /// Interval between countdown ticks
    pub timer_period: Duration,
    /// Payload container type
    pub mime_type: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            countdown_seconds: DEFAULT_COUNTDOWN_SECONDS,
            constraints: CameraConstraints::default(),
            timer_period: Duration::from_secs(1),
            mime_type: "video/webm".to_string(),
        }
    }
}

impl From<&CaptureConfig> for SessionSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            countdown_seconds: config.countdown_seconds,
            constraints: config.camera.constraints(),
            mime_type: config.service.mime_type.clone(),
            ..Self::default()
        }
    }
}

/// Point-in-time view of the session for presentation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub attempt: u64,
    pub state: SessionState,
    pub status_text: String,
    pub countdown_seconds: u32,
    pub holds_camera: bool,
    pub recorded_fragments: usize,
    pub payload_bytes: Option<usize>,
    pub result: Option<PredictionResult>,
    pub bp_category: Option<String>,
    pub error: Option<ErrorResponse>,
}

impl SessionSnapshot {
    fn capture(session: &CaptureSession) -> Self {
        Self {
            session_id: session.id(),
            attempt: session.attempt(),
            state: session.state(),
            status_text: session.state().status_text().to_string(),
            countdown_seconds: session.countdown_seconds(),
            holds_camera: session.holds_camera(),
            recorded_fragments: session.recorded_chunks().len(),
            payload_bytes: session.final_payload().map(|payload| payload.len()),
            result: session.result().cloned(),
            bp_category: session
                .result()
                .map(|result| result.bp_category().label().to_string()),
            error: session.last_error().map(ErrorResponse::from),
        }
    }
}

/// Cloneable remote control for a running controller
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    updates: broadcast::Sender<SessionSnapshot>,
}

impl SessionHandle {
    fn send(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Request a recording. Returns false once the controller is gone.
    pub fn start(&self) -> bool {
        self.send(SessionEvent::Start)
    }

    pub fn stop(&self) -> bool {
        self.send(SessionEvent::Stop)
    }

    pub fn retake(&self) -> bool {
        self.send(SessionEvent::Retake)
    }

    pub fn back(&self) -> bool {
        self.send(SessionEvent::Back)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    /// Snapshots published on every state or countdown change
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }
}

/// Single owner of the capture session
pub struct CaptureController {
    session: CaptureSession,
    arbiter: DeviceArbiter,
    timer: RecordingTimer,
    recorder: Recorder,
    uploader: UploadCoordinator,
    hooks: Box<dyn SessionHooks>,
    countdown_seconds: u32,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,

    snapshot: Arc<RwLock<SessionSnapshot>>,
    updates: broadcast::Sender<SessionSnapshot>,
}

impl CaptureController {
    pub fn new(
        device: Arc<dyn CameraDevice>,
        service: Arc<dyn PredictionService>,
        settings: SessionSettings,
    ) -> Self {
        let session = CaptureSession::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(64);
        let snapshot = Arc::new(RwLock::new(SessionSnapshot::capture(&session)));

        Self {
            session,
            arbiter: DeviceArbiter::new(device, settings.constraints),
            timer: RecordingTimer::new(settings.timer_period),
            recorder: Recorder::new(settings.mime_type),
            uploader: UploadCoordinator::new(service),
            hooks: Box::new(NoopHooks),
            countdown_seconds: settings.countdown_seconds,
            events_tx,
            events_rx,
            snapshot,
            updates,
        }
    }

    /// Replace the application callbacks
    pub fn with_hooks(mut self, hooks: impl SessionHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Camera acquire/release counters
    pub fn arbiter_stats(&self) -> Arc<ArbiterStats> {
        self.arbiter.stats()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.events_tx.clone(),
            snapshot: self.snapshot.clone(),
            updates: self.updates.clone(),
        }
    }

    /// Process events until the user navigates back
    pub async fn run(mut self) {
        while let Some(event) = self.events_rx.recv().await {
            let leaving = matches!(event, SessionEvent::Back);
            self.dispatch(event).await;
            if leaving {
                break;
            }
        }
        tracing::debug!("Capture controller stopped");
    }

    /// Process events until the session rests in `Idle`, `Results` or
    /// `Error` with nothing left queued
    pub async fn settle(&mut self) {
        self.drive(|_| false).await;
    }

    /// Process events until the session reaches `state`, or rests anywhere
    /// else as [`CaptureController::settle`] would
    pub async fn settle_in(&mut self, state: SessionState) {
        self.drive(|current| current == state).await;
    }

    async fn drive(&mut self, done: impl Fn(SessionState) -> bool) {
        loop {
            let state = self.session.state();
            if done(state) {
                return;
            }
            if state == SessionState::Idle || state.is_terminal() {
                match self.events_rx.try_recv() {
                    Ok(event) => self.dispatch(event).await,
                    Err(_) => return,
                }
                continue;
            }
            match self.events_rx.recv().await {
                Some(event) => self.dispatch(event).await,
                None => return,
            }
        }
    }

    /// Apply one event to the session
    pub async fn dispatch(&mut self, event: SessionEvent) {
        if let Some(attempt) = event.attempt() {
            if attempt != self.session.attempt() {
                tracing::trace!("Dropping stale event for attempt {}: {:?}", attempt, event);
                if let SessionEvent::Acquired { result: Ok(lease), .. } = event {
                    self.arbiter.discard(lease).await;
                }
                return;
            }
        }

        let state = self.session.state();
        match event {
            SessionEvent::Start => self.start().await,
            SessionEvent::Stop => {
                if state == SessionState::Recording {
                    tracing::info!("Recording stopped by user");
                    self.finish_recording(None).await;
                } else {
                    tracing::debug!("Ignoring stop while {:?}", state);
                }
            }
            SessionEvent::Retake => self.retake().await,
            SessionEvent::Back => self.navigate_back().await,
            SessionEvent::Acquired { result, .. } => {
                if state == SessionState::Acquiring {
                    self.on_acquired(result).await;
                } else if let Ok(lease) = result {
                    self.arbiter.discard(lease).await;
                }
            }
            SessionEvent::Tick { remaining, .. } => {
                if state != SessionState::Recording {
                    return;
                }
                self.session.countdown_seconds = remaining;
                self.publish();
                if remaining == 0 {
                    tracing::info!("Recording window elapsed");
                    self.finish_recording(None).await;
                }
            }
            SessionEvent::FragmentAvailable { .. } => {
                if state == SessionState::Recording {
                    self.recorder.collect(&mut self.session);
                }
            }
            SessionEvent::StreamEnded { error, .. } => {
                if state != SessionState::Recording {
                    return;
                }
                match &error {
                    Some(e) => tracing::warn!("Camera stream failed during recording: {}", e),
                    None => tracing::warn!("Camera stream ended before the countdown"),
                }
                self.finish_recording(error).await;
            }
            SessionEvent::UploadFinished { outcome, .. } => {
                if state == SessionState::Uploading {
                    self.on_upload_finished(outcome).await;
                }
            }
        }
    }

    async fn start(&mut self) {
        let state = self.session.state();
        if state != SessionState::Idle {
            tracing::debug!("Ignoring start while {:?}", state);
            return;
        }

        tracing::info!(
            "Starting capture (session {}, attempt {})",
            self.session.id(),
            self.session.attempt()
        );
        self.advance(SessionState::Acquiring);
        self.arbiter
            .request(&mut self.session, self.events_tx.clone())
            .await;
    }

    async fn on_acquired(&mut self, result: CaptureResult<StreamLease>) {
        let lease = match result {
            Ok(lease) => lease,
            Err(e) => {
                self.fail(e.into()).await;
                return;
            }
        };
        self.arbiter.grant(&mut self.session, lease).await;

        self.session.countdown_seconds = self.countdown_seconds;
        self.advance(SessionState::Recording);

        if let Err(e) = self.recorder.start(&mut self.session, self.events_tx.clone()) {
            self.fail(e).await;
            return;
        }
        self.timer.start(
            self.countdown_seconds,
            self.session.attempt(),
            self.events_tx.clone(),
        );
    }

    /// Stop capturing, seal the payload and hand it to the uploader.
    ///
    /// `cause` is the stream failure that ended the recording, if any.
    async fn finish_recording(&mut self, cause: Option<CaptureError>) {
        self.timer.cancel();
        // Joins the pump, so every fragment is queued before collecting
        self.arbiter.release(&mut self.session).await;
        self.recorder.collect(&mut self.session);

        if let Some(e) = cause {
            if self.session.recorded_chunks().is_empty() {
                self.fail(e.into()).await;
                return;
            }
        }

        self.advance(SessionState::Finalizing);
        match self.recorder.finalize(&mut self.session) {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => {
                self.fail(e).await;
                return;
            }
        }

        self.advance(SessionState::Uploading);
        if let Err(e) = self.uploader.submit(&self.session, self.events_tx.clone()) {
            self.fail(e).await;
        }
    }

    async fn on_upload_finished(&mut self, outcome: UploadResult<PredictionResult>) {
        match self.uploader.complete(outcome) {
            Ok(result) => {
                self.session.set_result(result.clone());
                self.advance(SessionState::Results);
                tracing::info!(
                    "Session {} finished: {}",
                    self.session.id(),
                    result.bp_category().label()
                );
                self.hooks.on_save_reading(&result);
            }
            Err(e) => self.fail(e).await,
        }
    }

    /// Release everything and move to `Error`
    async fn fail(&mut self, error: SessionError) {
        self.timer.cancel();
        self.uploader.abort();
        self.arbiter.release(&mut self.session).await;
        self.recorder.discard();

        let stage = if error.is_capture_failure() {
            "capture"
        } else {
            "upload"
        };
        tracing::error!(
            "Session {} failed during {} ({}): {}",
            self.session.id(),
            stage,
            error.code(),
            error
        );
        self.session.set_error(error);
        self.advance(SessionState::Error);
    }

    async fn retake(&mut self) {
        let state = self.session.state();
        if !state.is_terminal() {
            tracing::debug!("Ignoring retake while {:?}", state);
            return;
        }

        self.timer.cancel();
        self.uploader.reset();
        self.arbiter.release(&mut self.session).await;
        self.recorder.discard();

        if let Err(e) = self.session.reset_for_retake() {
            tracing::warn!("Retake rejected: {}", e);
            return;
        }
        tracing::info!("Retake (attempt {})", self.session.attempt());
        self.publish();
    }

    async fn navigate_back(&mut self) {
        self.timer.cancel();
        self.uploader.reset();
        self.arbiter.release(&mut self.session).await;
        self.recorder.discard();

        tracing::info!(
            "Leaving capture screen from {:?} (session {})",
            self.session.state(),
            self.session.id()
        );
        self.session = CaptureSession::following(&self.session);
        self.publish();
        self.hooks.on_back();
    }

    fn advance(&mut self, next: SessionState) {
        if let Err(e) = self.session.transition(next) {
            tracing::warn!("{}", e);
            return;
        }
        tracing::debug!("Session state: {:?}", next);
        self.publish();
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot::capture(&self.session);
        *self.snapshot.write() = snapshot.clone();
        let _ = self.updates.send(snapshot);
    }
}
