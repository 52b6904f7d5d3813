//! Device arbitration
//!
//! The arbiter is the only place a camera stream is opened or closed. The
//! open stream lives in a [`StreamLease`] stored on the session, so there is
//! never more than one lease per session, and every acquisition releases
//! the previous lease first.
//!
//! Opening runs in a background task so the permission prompt never blocks
//! the controller; a request can be abandoned while it is pending.

use super::traits::{CameraConstraints, CameraDevice, MediaStream};
use crate::recorder::events::SessionEvent;
use crate::recorder::state::CaptureSession;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Acquire/release counters, shared so callers can observe them after the
/// controller consumed the arbiter.
#[derive(Debug, Default)]
pub struct ArbiterStats {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl ArbiterStats {
    /// Number of successful acquisitions
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Number of releases of a held lease
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Leases currently held
    pub fn held(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

enum LeaseState {
    /// Stream opened, nobody reading from it yet
    Open(Box<dyn MediaStream>),
    /// A recorder pump owns the stream until cancelled
    Pumping {
        cancel: CancellationToken,
        task: JoinHandle<Box<dyn MediaStream>>,
    },
}

/// Exclusive ownership of an open camera stream.
///
/// Dropping a lease without [`DeviceArbiter::release`] still cancels the
/// pump; the stream is then dropped with the pump task.
pub struct StreamLease {
    id: Uuid,
    label: String,
    mime_type: String,
    state: Option<LeaseState>,
}

impl StreamLease {
    pub(crate) fn new(stream: Box<dyn MediaStream>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: stream.label().to_string(),
            mime_type: stream.mime_type().to_string(),
            state: Some(LeaseState::Open(stream)),
        }
    }

    /// Lease identifier, for log correlation
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Device label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Container MIME type of the stream
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Whether a pump currently owns the stream
    pub fn is_pumping(&self) -> bool {
        matches!(self.state, Some(LeaseState::Pumping { .. }))
    }

    /// Hand the stream to a pump task.
    ///
    /// `spawn` receives the stream and a cancellation token and must return
    /// the task, which gives the stream back when it exits. Returns false if
    /// the stream is already attached.
    pub fn attach<F>(&mut self, spawn: F) -> bool
    where
        F: FnOnce(Box<dyn MediaStream>, CancellationToken) -> JoinHandle<Box<dyn MediaStream>>,
    {
        match self.state.take() {
            Some(LeaseState::Open(stream)) => {
                let cancel = CancellationToken::new();
                let task = spawn(stream, cancel.clone());
                self.state = Some(LeaseState::Pumping { cancel, task });
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    async fn close(mut self) {
        match self.state.take() {
            Some(LeaseState::Open(mut stream)) => stream.stop().await,
            Some(LeaseState::Pumping { cancel, task }) => {
                cancel.cancel();
                match task.await {
                    Ok(mut stream) => stream.stop().await,
                    Err(e) => tracing::warn!("Capture pump for {} ended abnormally: {}", self.label, e),
                }
            }
            None => {}
        }
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        if let Some(LeaseState::Pumping { cancel, .. }) = &self.state {
            cancel.cancel();
        }
    }
}

impl fmt::Debug for StreamLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamLease")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("mime_type", &self.mime_type)
            .field("pumping", &self.is_pumping())
            .finish()
    }
}

/// Grants and revokes the camera lease of a session
pub struct DeviceArbiter {
    device: Arc<dyn CameraDevice>,
    constraints: CameraConstraints,
    stats: Arc<ArbiterStats>,
    pending: Option<JoinHandle<()>>,
}

impl DeviceArbiter {
    /// Create an arbiter for `device`
    pub fn new(device: Arc<dyn CameraDevice>, constraints: CameraConstraints) -> Self {
        Self {
            device,
            constraints,
            stats: Arc::new(ArbiterStats::default()),
            pending: None,
        }
    }

    /// Shared acquire/release counters
    pub fn stats(&self) -> Arc<ArbiterStats> {
        self.stats.clone()
    }

    /// Ask for the camera on behalf of `session`.
    ///
    /// Any lease or request the session still holds is released first. The
    /// device is opened in the background; the outcome arrives as
    /// [`SessionEvent::Acquired`] tagged with the session's attempt and is
    /// installed with [`DeviceArbiter::grant`].
    pub async fn request(
        &mut self,
        session: &mut CaptureSession,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        self.release(session).await;

        let attempt = session.attempt();
        let device = self.device.clone();
        let constraints = self.constraints.clone();
        tracing::debug!(
            "Requesting camera (facing: {:?}, device: {:?})",
            constraints.facing_mode,
            constraints.device_id
        );

        self.pending = Some(tokio::spawn(async move {
            let result = device.open(&constraints).await.map(StreamLease::new);
            // A refused send means the controller is gone; the lease drops here
            let _ = events.send(SessionEvent::Acquired { attempt, result });
        }));
    }

    /// Install a lease delivered by [`DeviceArbiter::request`]
    pub async fn grant(&mut self, session: &mut CaptureSession, lease: StreamLease) {
        self.pending = None;
        self.release(session).await;

        tracing::info!("Camera acquired: {} ({})", lease.label(), lease.id());
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);
        session.stream = Some(lease);
    }

    /// Close a lease that arrived for a session that no longer wants it
    pub async fn discard(&self, lease: StreamLease) {
        tracing::debug!("Discarding late camera lease {}", lease.id());
        lease.close().await;
    }

    /// Abandon a pending request and release the session's lease, if any.
    /// Idempotent.
    pub async fn release(&mut self, session: &mut CaptureSession) {
        if let Some(task) = self.pending.take() {
            if !task.is_finished() {
                task.abort();
                tracing::debug!("Pending camera request abandoned");
            }
        }

        let Some(lease) = session.stream.take() else {
            return;
        };

        let id = lease.id();
        lease.close().await;
        self.stats.released.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Camera released ({})", id);
    }
}

impl Drop for DeviceArbiter {
    fn drop(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}
