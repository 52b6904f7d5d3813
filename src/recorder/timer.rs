//! Recording countdown
//!
//! A cancellable ticker publishing one [`SessionEvent::Tick`] per period
//! until the countdown reaches zero.

use super::events::SessionEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Length of the recording window in seconds
pub const DEFAULT_COUNTDOWN_SECONDS: u32 = 7;

pub struct RecordingTimer {
    period: Duration,
    ticker: Option<JoinHandle<()>>,
}

impl RecordingTimer {
    /// Timer ticking once per `period`
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ticker: None,
        }
    }

    /// Start counting down from `duration_seconds`, replacing any running
    /// countdown. Publishes `remaining` = duration-1, ..., 0.
    pub fn start(
        &mut self,
        duration_seconds: u32,
        attempt: u64,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) {
        self.cancel();

        let period = self.period;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            let mut remaining = duration_seconds;
            loop {
                if remaining > 0 {
                    interval.tick().await;
                    remaining -= 1;
                }
                if events.send(SessionEvent::Tick { attempt, remaining }).is_err() {
                    break;
                }
                if remaining == 0 {
                    break;
                }
            }
        });

        tracing::debug!("Countdown started: {}s (attempt {})", duration_seconds, attempt);
        self.ticker = Some(handle);
    }

    /// Stop the countdown. Returns true if one was running.
    pub fn cancel(&mut self) -> bool {
        match self.ticker.take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                was_running
            }
            None => false,
        }
    }
}

impl Default for RecordingTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Drop for RecordingTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
