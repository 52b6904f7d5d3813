//! Scripted camera, prediction service and hooks shared by the integration
//! tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vitals_capture::capture::{
    CameraConstraints, CameraDevice, CaptureError, CaptureResult, MediaStream,
};
use vitals_capture::recorder::{
    CaptureController, FinalPayload, SessionHooks, SessionSettings,
};
use vitals_capture::upload::{PredictionResult, PredictionService, UploadError, UploadResult};

pub const SAMPLE_RESPONSE: &str = r#"{"systolic":118,"diastolic":76,"heart_rate":72,"age":34,"gender":"female","signal_quality":"good","session_id":"abc123"}"#;

pub fn sample_result() -> PredictionResult {
    PredictionResult::from_json(SAMPLE_RESPONSE.as_bytes()).unwrap()
}

/// What a fake stream does once its scripted fragments run out
#[derive(Debug, Clone)]
pub enum AfterScript {
    /// Keep the camera open without producing anything
    Hang,
    /// End the stream cleanly
    End,
    /// Fail the stream
    Fail(CaptureError),
}

/// Opens and stops seen by a fake camera
#[derive(Debug, Default)]
pub struct CameraCounters {
    opens: AtomicUsize,
    stops: AtomicUsize,
    pending_opens: AtomicUsize,
}

impl CameraCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet stopped
    pub fn live(&self) -> usize {
        self.opens().saturating_sub(self.stops())
    }

    /// Open calls still waiting for the device
    pub fn pending_opens(&self) -> usize {
        self.pending_opens.load(Ordering::SeqCst)
    }
}

/// Counts an unanswered open for as long as the open future is alive
struct PendingOpen(Arc<CameraCounters>);

impl PendingOpen {
    fn new(counters: Arc<CameraCounters>) -> Self {
        counters.pending_opens.fetch_add(1, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for PendingOpen {
    fn drop(&mut self) {
        self.0.pending_opens.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct FakeCamera {
    script: Vec<Bytes>,
    interval: Duration,
    after: AfterScript,
    deny: Option<CaptureError>,
    unresponsive: bool,
    counters: Arc<CameraCounters>,
}

impl FakeCamera {
    /// Camera emitting `fragments`, one per second, then staying open
    pub fn with_fragments(fragments: &[&str]) -> Self {
        Self {
            script: fragments
                .iter()
                .map(|f| Bytes::copy_from_slice(f.as_bytes()))
                .collect(),
            interval: Duration::from_secs(1),
            after: AfterScript::Hang,
            deny: None,
            unresponsive: false,
            counters: Arc::default(),
        }
    }

    /// Camera whose open always fails with `error`
    pub fn denied(error: CaptureError) -> Self {
        Self {
            deny: Some(error),
            ..Self::with_fragments(&[])
        }
    }

    /// Camera whose open never answers, like an unanswered permission prompt
    pub fn unresponsive() -> Self {
        Self {
            unresponsive: true,
            ..Self::with_fragments(&[])
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn then(mut self, after: AfterScript) -> Self {
        self.after = after;
        self
    }

    pub fn counters(&self) -> Arc<CameraCounters> {
        self.counters.clone()
    }
}

#[async_trait]
impl CameraDevice for FakeCamera {
    async fn open(&self, _constraints: &CameraConstraints) -> CaptureResult<Box<dyn MediaStream>> {
        if self.unresponsive {
            let _waiting = PendingOpen::new(self.counters.clone());
            std::future::pending::<()>().await;
        }
        if let Some(error) = &self.deny {
            return Err(error.clone());
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            script: self.script.iter().cloned().collect(),
            interval: self.interval,
            after: self.after.clone(),
            counters: self.counters.clone(),
            stopped: false,
        }))
    }
}

struct FakeStream {
    script: VecDeque<Bytes>,
    interval: Duration,
    after: AfterScript,
    counters: Arc<CameraCounters>,
    stopped: bool,
}

#[async_trait]
impl MediaStream for FakeStream {
    fn label(&self) -> &str {
        "fake camera"
    }

    fn mime_type(&self) -> &str {
        "video/webm"
    }

    async fn next_fragment(&mut self) -> CaptureResult<Option<Bytes>> {
        if self.script.is_empty() {
            return match &self.after {
                AfterScript::Hang => std::future::pending::<CaptureResult<Option<Bytes>>>().await,
                AfterScript::End => {
                    tokio::time::sleep(self.interval).await;
                    Ok(None)
                }
                AfterScript::Fail(error) => Err(error.clone()),
            };
        }
        tokio::time::sleep(self.interval).await;
        Ok(self.script.pop_front())
    }

    async fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Prediction service returning a fixed outcome
pub struct FakeService {
    outcome: UploadResult<PredictionResult>,
    delay: Duration,
    camera: Option<Arc<CameraCounters>>,
    calls: AtomicUsize,
    payloads: Mutex<Vec<Bytes>>,
    live_cameras_at_call: Mutex<Vec<usize>>,
}

impl FakeService {
    pub fn returning(outcome: UploadResult<PredictionResult>) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            camera: None,
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
            live_cameras_at_call: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::returning(Ok(sample_result()))
    }

    pub fn failing(error: UploadError) -> Self {
        Self::returning(Err(error))
    }

    /// Answer only after `delay`
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Record how many streams of `camera` are open when called
    pub fn watching(mut self, camera: &FakeCamera) -> Self {
        self.camera = Some(camera.counters());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Bytes> {
        self.payloads.lock().clone()
    }

    pub fn live_cameras_at_call(&self) -> Vec<usize> {
        self.live_cameras_at_call.lock().clone()
    }
}

#[async_trait]
impl PredictionService for FakeService {
    async fn submit(&self, payload: &FinalPayload) -> UploadResult<PredictionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().push(payload.data().clone());
        if let Some(camera) = &self.camera {
            self.live_cameras_at_call.lock().push(camera.live());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

/// Hooks remembering every callback
#[derive(Clone, Default)]
pub struct RecordingHooks {
    saved: Arc<Mutex<Vec<PredictionResult>>>,
    backs: Arc<AtomicUsize>,
}

impl RecordingHooks {
    pub fn saved(&self) -> Vec<PredictionResult> {
        self.saved.lock().clone()
    }

    pub fn backs(&self) -> usize {
        self.backs.load(Ordering::SeqCst)
    }
}

impl SessionHooks for RecordingHooks {
    fn on_save_reading(&self, result: &PredictionResult) {
        self.saved.lock().push(result.clone());
    }

    fn on_back(&self) {
        self.backs.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn controller(
    camera: &FakeCamera,
    service: &Arc<FakeService>,
    hooks: &RecordingHooks,
) -> CaptureController {
    controller_with(camera, service, hooks, SessionSettings::default())
}

pub fn controller_with(
    camera: &FakeCamera,
    service: &Arc<FakeService>,
    hooks: &RecordingHooks,
    settings: SessionSettings,
) -> CaptureController {
    CaptureController::new(Arc::new(camera.clone()), service.clone(), settings)
        .with_hooks(hooks.clone())
}
