//! Fragment accumulation and finalization
//!
//! The recorder attaches a pump to the leased camera stream. The pump moves
//! fragments onto an ordered channel; the controller drains that channel
//! into the session while recording and seals the result into a
//! [`FinalPayload`] exactly once.

use super::events::SessionEvent;
use super::state::CaptureSession;
use crate::capture::MediaStream;
use crate::utils::{SessionError, SessionResult};
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The finalized recording, ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalPayload {
    data: Bytes,
    mime_type: String,
    fragment_count: usize,
}

impl FinalPayload {
    /// Wrap an already-complete recording
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
            fragment_count: 1,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Concatenate `chunks` in order
    fn concat(chunks: Vec<Bytes>, mime_type: &str) -> Self {
        let total: usize = chunks.iter().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(total);
        for chunk in &chunks {
            data.extend_from_slice(chunk);
        }
        Self {
            data: data.freeze(),
            mime_type: mime_type.to_string(),
            fragment_count: chunks.len(),
        }
    }
}

/// Drives the fragment pump for one attempt at a time
pub struct Recorder {
    mime_type: String,
    fragments: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl Recorder {
    /// Create a recorder producing `mime_type` payloads unless the stream
    /// reports its own container type
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            fragments: None,
        }
    }

    /// Attach the pump to the session's camera lease
    pub fn start(
        &mut self,
        session: &mut CaptureSession,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> SessionResult<()> {
        let attempt = session.attempt();
        let lease = session.stream.as_mut().ok_or_else(|| {
            SessionError::DeviceUnavailable("recording started without a camera".to_string())
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let attached = lease.attach(|stream, cancel| {
            tokio::spawn(pump(stream, cancel, attempt, tx, events))
        });
        if !attached {
            return Err(SessionError::DeviceUnavailable(
                "camera stream is already being recorded".to_string(),
            ));
        }

        self.mime_type = lease.mime_type().to_string();
        self.fragments = Some(rx);
        session.recorded_chunks.clear();
        tracing::debug!("Recorder attached to {} (attempt {})", lease.label(), attempt);
        Ok(())
    }

    /// Drain queued fragments into the session; returns how many were taken
    pub fn collect(&mut self, session: &mut CaptureSession) -> usize {
        let Some(rx) = self.fragments.as_mut() else {
            return 0;
        };

        let mut taken = 0;
        while let Ok(chunk) = rx.try_recv() {
            if session.append_chunk(chunk) {
                taken += 1;
            }
        }
        taken
    }

    /// Seal the captured fragments into the session's payload.
    ///
    /// Returns `Ok(None)` if the payload already exists. Fails with
    /// [`SessionError::EmptyRecording`] when nothing was captured.
    pub fn finalize(&mut self, session: &mut CaptureSession) -> SessionResult<Option<FinalPayload>> {
        if session.final_payload.is_some() {
            return Ok(None);
        }
        self.fragments = None;

        let chunks = std::mem::take(&mut session.recorded_chunks);
        if chunks.is_empty() {
            return Err(SessionError::EmptyRecording);
        }

        let payload = FinalPayload::concat(chunks, &self.mime_type);
        tracing::info!(
            "Recording finalized: {} bytes from {} fragments",
            payload.len(),
            payload.fragment_count()
        );
        session.final_payload = Some(payload.clone());
        Ok(Some(payload))
    }

    /// Drop any fragments still queued for the current attempt
    pub fn discard(&mut self) {
        self.fragments = None;
    }
}

/// Move fragments from the stream to the recorder until cancelled or the
/// stream ends. Hands the stream back so the arbiter can stop it.
async fn pump(
    mut stream: Box<dyn MediaStream>,
    cancel: CancellationToken,
    attempt: u64,
    fragments: mpsc::UnboundedSender<Bytes>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Box<dyn MediaStream> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next_fragment() => match next {
                Ok(Some(chunk)) => {
                    // Zero-size chunks carry nothing worth keeping
                    if chunk.is_empty() {
                        continue;
                    }
                    if fragments.send(chunk).is_err() {
                        break;
                    }
                    let _ = events.send(SessionEvent::FragmentAvailable { attempt });
                }
                Ok(None) => {
                    let _ = events.send(SessionEvent::StreamEnded { attempt, error: None });
                    break;
                }
                Err(e) => {
                    let _ = events.send(SessionEvent::StreamEnded { attempt, error: Some(e) });
                    break;
                }
            }
        }
    }
    stream
}
