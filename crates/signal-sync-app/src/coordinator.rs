//! Top-level owner of the sync state, the request cycle and the poller.

use std::sync::Arc;

use signal_sync_core::ImageResolver;
use signal_sync_transport::{DetectionBackend, StagedImage};
use signal_sync_ui::{DashboardSnapshot, UiState, project_dashboard};
use tokio::sync::watch;
use tracing::info;

use crate::config::SyncConfig;
use crate::poller::ResultPoller;
use crate::request_cycle::{CycleOutcome, CycleRequest, RequestCycle};
use crate::state::SyncState;
use crate::{AppError, version_label};

/// Wires the request cycle and the poller to one shared gate.
///
/// Passive arbiter: it never retries or cancels a cycle. Whichever result
/// carries the larger timestamp wins, regardless of arrival order.
#[derive(Debug)]
pub struct SyncCoordinator {
    config: SyncConfig,
    state: Arc<SyncState>,
    cycle: Arc<RequestCycle>,
    poller: ResultPoller,
}

impl SyncCoordinator {
    /// Builds a coordinator over `backend`.
    ///
    /// # Errors
    /// Returns [`AppError::Core`] when the configured base URL cannot resolve
    /// image references.
    pub fn new(config: SyncConfig, backend: Arc<dyn DetectionBackend>) -> Result<Self, AppError> {
        let resolver = ImageResolver::new(&config.base_url)?;
        let state = Arc::new(SyncState::new(
            resolver,
            UiState::new(version_label(), config.class_count),
        ));
        let cycle = Arc::new(RequestCycle::new(
            Arc::clone(&backend),
            Arc::clone(&state),
            config.timer_tick,
        ));
        let poller = ResultPoller::new(backend, Arc::clone(&state));

        Ok(Self {
            config,
            state,
            cycle,
            poller,
        })
    }

    /// Starts the poller unless polling is disabled. Returns whether it runs.
    pub fn start(&self) -> bool {
        if !self.config.polling_enabled {
            info!(
                stage = "coordinator",
                action = "start",
                "polling disabled by configuration"
            );
            return false;
        }
        self.poller.start(self.config.poll_interval());
        true
    }

    /// Stops the poller. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if self.poller.stop() {
            info!(stage = "coordinator", action = "shutdown", "coordinator stopped");
        }
    }

    /// Uploads the staged image (if any), then captures and detects.
    pub async fn capture(&self) -> CycleOutcome {
        self.cycle.run(CycleRequest::Capture).await
    }

    /// Uploads `image` with the configured thresholds and detects on it.
    pub async fn upload_and_detect(&self, image: StagedImage) -> CycleOutcome {
        self.cycle
            .run(CycleRequest::UploadAndDetect {
                image,
                params: self.config.detection.clone(),
            })
            .await
    }

    /// Stages an image for the next capture.
    pub fn stage_image(&self, image: StagedImage) {
        self.cycle.stage(image);
    }

    /// Shared handle to the request cycle, for spawning cycles off-thread.
    pub fn request_cycle(&self) -> Arc<RequestCycle> {
        Arc::clone(&self.cycle)
    }

    /// Active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Subscribes to UI state changes.
    pub fn subscribe_ui(&self) -> watch::Receiver<UiState> {
        self.state.subscribe()
    }

    /// Subscribes to the elapsed-time display.
    pub fn subscribe_elapsed(&self) -> watch::Receiver<String> {
        self.cycle.subscribe_elapsed()
    }

    /// Current UI state.
    pub fn ui_snapshot(&self) -> UiState {
        self.state.ui_snapshot()
    }

    /// Current dashboard, including the elapsed-time display.
    pub fn dashboard(&self) -> DashboardSnapshot {
        project_dashboard(&self.state.ui_snapshot(), &self.cycle.elapsed())
    }

    /// Greatest result timestamp applied so far.
    pub fn last_applied_timestamp(&self) -> u64 {
        self.state.last_applied_timestamp()
    }

    /// Returns `true` while the poller runs.
    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Returns `true` while a request cycle runs.
    pub fn request_in_flight(&self) -> bool {
        self.cycle.in_flight()
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
