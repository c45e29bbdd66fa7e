//! Background poll of the shared last-result resource.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use signal_sync_core::ResultSource;
use signal_sync_transport::DetectionBackend;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::state::{ApplyOutcome, SyncState};

/// Result of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A newer result was applied.
    Applied {
        /// Timestamp of the applied result.
        timestamp: u64,
    },
    /// The fetched result was not newer than the last applied one.
    Stale {
        /// Gate value that rejected the result.
        last_applied: u64,
    },
    /// The resource does not exist yet or is empty.
    Absent,
    /// The fetch failed in transport or decoding.
    FetchFailed,
    /// The resource carried an explicit error indicator.
    Rejected,
}

struct ActivePoll {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Recurring fetch of the shared last-result resource.
///
/// Every failure is a steady state: it is logged at `debug` and never
/// reaches the UI.
pub struct ResultPoller {
    backend: Arc<dyn DetectionBackend>,
    state: Arc<SyncState>,
    active: Mutex<Option<ActivePoll>>,
}

impl ResultPoller {
    /// Creates a stopped poller.
    pub fn new(backend: Arc<dyn DetectionBackend>, state: Arc<SyncState>) -> Self {
        Self {
            backend,
            state,
            active: Mutex::new(None),
        }
    }

    /// Returns `true` while the poll loop is active.
    pub fn is_running(&self) -> bool {
        self.lock_active().is_some()
    }

    /// Starts polling: one immediate fetch, then one every `interval`.
    ///
    /// Returns `false` without side effects when already running. Fetches run
    /// sequentially, so a slow response delays the next tick instead of
    /// overlapping it. Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) -> bool {
        let mut active = self.lock_active();
        if active.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticks.tick() => {}
                }
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = poll_shared_result(backend.as_ref(), &state) => {}
                }
            }
        });

        *active = Some(ActivePoll { cancel, handle });
        info!(
            stage = "poller",
            action = "start",
            interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "result poller started"
        );
        true
    }

    /// Stops polling. Returns `false` when it was not running.
    pub fn stop(&self) -> bool {
        let stopped = cancel(self.lock_active().take());
        if stopped {
            info!(stage = "poller", action = "stop", "result poller stopped");
        }
        stopped
    }

    /// Runs one poll tick outside the loop.
    pub async fn poll_once(&self) -> PollOutcome {
        poll_shared_result(self.backend.as_ref(), &self.state).await
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActivePoll>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ResultPoller {
    fn drop(&mut self) {
        let active = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        cancel(active);
    }
}

impl std::fmt::Debug for ResultPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultPoller")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn cancel(active: Option<ActivePoll>) -> bool {
    match active {
        Some(active) => {
            active.cancel.cancel();
            active.handle.abort();
            true
        }
        None => false,
    }
}

/// Fetches the shared resource once and offers it to the gate.
async fn poll_shared_result(backend: &dyn DetectionBackend, state: &SyncState) -> PollOutcome {
    let result = match backend.fetch_last_result(state.cache_token()).await {
        Ok(Some(result)) => result,
        Ok(None) => {
            debug!(stage = "poller", action = "fetch", "no shared result yet");
            return PollOutcome::Absent;
        }
        Err(error) => {
            debug!(stage = "poller", action = "fetch", %error, "poll fetch failed");
            return PollOutcome::FetchFailed;
        }
    };

    match state.offer(&result, ResultSource::Poller) {
        Ok(ApplyOutcome::Applied { timestamp }) => {
            let timestamp = timestamp.unwrap_or_default();
            info!(stage = "poller", action = "apply", timestamp, "applied shared result");
            PollOutcome::Applied { timestamp }
        }
        Ok(ApplyOutcome::Stale { last_applied }) => PollOutcome::Stale { last_applied },
        Err(error) => {
            debug!(stage = "poller", action = "apply", %error, "shared result reports failure");
            PollOutcome::Rejected
        }
    }
}
