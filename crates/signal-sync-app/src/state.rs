//! Shared synchronization state consulted by every result source.

use std::sync::{Mutex, PoisonError};

use signal_sync_contract::DetectionResult;
use signal_sync_core::{
    CacheBuster, CoreError, GateDecision, ImageResolver, ResultSource, TimestampGate,
    build_view_model,
};
use signal_sync_ui::UiState;
use tokio::sync::watch;

/// Outcome of offering one successful result to the shared gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The result replaced the displayed view model.
    Applied {
        /// Timestamp of the applied result, `None` for untimed cycle results.
        timestamp: Option<u64>,
    },
    /// A result at least as new had already been applied.
    Stale {
        /// Gate value that rejected the result.
        last_applied: u64,
    },
}

/// Process-wide synchronization state.
///
/// Holds the single monotonic gate and the published UI state. The
/// compare-and-apply step runs under one lock so a request cycle and a poll
/// completing together cannot interleave between the comparison and the
/// view-model swap.
#[derive(Debug)]
pub struct SyncState {
    gate: Mutex<TimestampGate>,
    ui: watch::Sender<UiState>,
    resolver: ImageResolver,
    cache: CacheBuster,
}

impl SyncState {
    /// Creates state publishing `initial` as the first UI value.
    pub fn new(resolver: ImageResolver, initial: UiState) -> Self {
        let (ui, _) = watch::channel(initial);
        Self {
            gate: Mutex::new(TimestampGate::new()),
            ui,
            resolver,
            cache: CacheBuster::new(),
        }
    }

    /// Greatest result timestamp applied so far (`0` when unset).
    pub fn last_applied_timestamp(&self) -> u64 {
        self.lock_gate().last_applied()
    }

    /// Subscribes to UI state changes.
    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.ui.subscribe()
    }

    /// Returns a clone of the current UI state.
    pub fn ui_snapshot(&self) -> UiState {
        self.ui.borrow().clone()
    }

    /// Mutates UI state and notifies subscribers.
    pub fn update_ui(&self, modify: impl FnOnce(&mut UiState)) {
        self.ui.send_modify(modify);
    }

    /// Next cache-defeating token.
    pub fn cache_token(&self) -> u64 {
        self.cache.next_token()
    }

    /// Offers a result to the gate and applies it when it is newer.
    ///
    /// # Errors
    /// Returns [`CoreError::ResultReportsFailure`] for payloads carrying an
    /// error; such payloads never touch the gate or the view model.
    pub fn offer(
        &self,
        result: &DetectionResult,
        source: ResultSource,
    ) -> Result<ApplyOutcome, CoreError> {
        let view = build_view_model(result, &self.resolver, self.cache.next_token())?;

        let mut gate = self.lock_gate();
        match gate.offer(result.timestamp_field(), source) {
            GateDecision::Stale { last_applied } => Ok(ApplyOutcome::Stale { last_applied }),
            GateDecision::Advanced { .. } | GateDecision::Untimed => {
                self.ui.send_modify(|ui| ui.apply_view(view));
                Ok(ApplyOutcome::Applied {
                    timestamp: result.timestamp,
                })
            }
        }
    }

    // The gate is a single integer; a panic elsewhere cannot leave it torn.
    fn lock_gate(&self) -> std::sync::MutexGuard<'_, TimestampGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
