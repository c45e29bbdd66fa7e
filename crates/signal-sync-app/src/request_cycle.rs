//! One user-triggered "produce image -> detect -> apply" sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use signal_sync_contract::{DetectionParams, DetectionResult};
use signal_sync_core::{CoreError, ResultSource};
use signal_sync_timer::{ElapsedTimer, TickConfig};
use signal_sync_transport::{DetectionBackend, StagedImage, TransportError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::state::{ApplyOutcome, SyncState};

/// Which backend operation a cycle performs.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleRequest {
    /// Upload the staged image (if any), then capture and detect server-side.
    Capture,
    /// Upload an image together with detection thresholds and detect on it.
    UploadAndDetect {
        /// Image to analyze.
        image: StagedImage,
        /// Thresholds sent alongside the image.
        params: DetectionParams,
    },
}

/// Result of one trigger.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Another cycle was in flight; nothing happened.
    Busy,
    /// The result was applied to the view model.
    Applied {
        /// Timestamp of the applied result, if it carried one.
        timestamp: Option<u64>,
    },
    /// The cycle succeeded but a newer result had already been applied.
    Superseded {
        /// Gate value at the time the result arrived.
        last_applied: u64,
    },
    /// The cycle failed; the message was surfaced to the UI.
    Failed(CycleError),
}

impl CycleOutcome {
    /// Returns `true` when the backend round trip completed without error.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Applied { .. } | Self::Superseded { .. })
    }
}

/// Failure of one request cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Pre-step upload of the staged image failed in transport.
    #[error("upload failed: {0}")]
    Upload(TransportError),
    /// Backend refused the staged image.
    #[error("upload rejected: {0}")]
    UploadRejected(String),
    /// Capture or detect call failed in transport.
    #[error("detection request failed: {0}")]
    Detect(TransportError),
    /// Backend answered with an explicit error indicator.
    #[error("detection failed: {0}")]
    Rejected(String),
}

impl From<CoreError> for CycleError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::ResultReportsFailure(message) => Self::Rejected(message),
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// Runs request cycles with at most one in flight.
///
/// Owns the elapsed timer and the staged upload. Triggers arriving while a
/// cycle is running return [`CycleOutcome::Busy`] without touching any state.
pub struct RequestCycle {
    backend: Arc<dyn DetectionBackend>,
    state: Arc<SyncState>,
    in_flight: AtomicBool,
    timer: Mutex<ElapsedTimer>,
    elapsed: watch::Receiver<String>,
    staged: Mutex<Option<StagedImage>>,
}

impl RequestCycle {
    /// Creates an idle request cycle.
    pub fn new(
        backend: Arc<dyn DetectionBackend>,
        state: Arc<SyncState>,
        timer_tick: TickConfig,
    ) -> Self {
        let timer = ElapsedTimer::new(timer_tick);
        let elapsed = timer.subscribe();
        Self {
            backend,
            state,
            in_flight: AtomicBool::new(false),
            timer: Mutex::new(timer),
            elapsed,
            staged: Mutex::new(None),
        }
    }

    /// Returns `true` while a cycle is running.
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Subscribes to the elapsed-time display of the running cycle.
    pub fn subscribe_elapsed(&self) -> watch::Receiver<String> {
        self.elapsed.clone()
    }

    /// Currently displayed elapsed time.
    pub fn elapsed(&self) -> String {
        self.elapsed.borrow().clone()
    }

    /// Stages an image for the next capture, replacing any earlier one.
    pub fn stage(&self, image: StagedImage) {
        info!(
            stage = "request_cycle",
            action = "stage",
            file = image.file_name(),
            bytes = image.len(),
            fingerprint = %image.fingerprint(),
            "image staged"
        );
        let label = image.file_name().to_string();
        *lock(&self.staged) = Some(image);
        self.state.update_ui(|ui| ui.stage_file(label));
    }

    /// Returns the staged image, if any.
    pub fn staged(&self) -> Option<StagedImage> {
        lock(&self.staged).clone()
    }

    /// Runs one cycle to completion.
    ///
    /// Cleanup (timer stop, trigger re-enable, in-flight release) runs on
    /// every exit path, including cancellation of the returned future.
    pub async fn run(&self, request: CycleRequest) -> CycleOutcome {
        let Some(_guard) = InFlightGuard::acquire(self) else {
            debug!(stage = "request_cycle", action = "trigger", "cycle already in flight");
            return CycleOutcome::Busy;
        };

        let submitted = match &request {
            CycleRequest::Capture => self.staged(),
            CycleRequest::UploadAndDetect { image, .. } => Some(image.clone()),
        };

        let outcome = match self.execute(request, submitted.as_ref()).await {
            Ok(ApplyOutcome::Applied { timestamp }) => CycleOutcome::Applied { timestamp },
            Ok(ApplyOutcome::Stale { last_applied }) => {
                debug!(
                    stage = "request_cycle",
                    action = "apply",
                    last_applied,
                    "result superseded by a newer one"
                );
                CycleOutcome::Superseded { last_applied }
            }
            Err(error) => {
                warn!(stage = "request_cycle", action = "fail", %error, "request cycle failed");
                let message = error.to_string();
                self.state.update_ui(|ui| ui.fail_request(message));
                return CycleOutcome::Failed(error);
            }
        };

        if let Some(submitted) = submitted {
            self.clear_staged_if(&submitted);
        }
        outcome
    }

    async fn execute(
        &self,
        request: CycleRequest,
        staged: Option<&StagedImage>,
    ) -> Result<ApplyOutcome, CycleError> {
        let result = match request {
            CycleRequest::Capture => {
                if let Some(image) = staged {
                    self.upload_staged(image).await?;
                }
                self.backend
                    .capture_and_detect()
                    .await
                    .map_err(CycleError::Detect)?
            }
            CycleRequest::UploadAndDetect { image, params } => self
                .backend
                .upload_and_detect(&image, &params)
                .await
                .map_err(CycleError::Detect)?,
        };
        self.apply(&result)
    }

    async fn upload_staged(&self, image: &StagedImage) -> Result<(), CycleError> {
        let ack = self
            .backend
            .upload_image(image)
            .await
            .map_err(CycleError::Upload)?;
        if let Some(reason) = ack.failure() {
            return Err(CycleError::UploadRejected(reason.to_string()));
        }
        debug!(
            stage = "request_cycle",
            action = "upload",
            fingerprint = %image.fingerprint(),
            "staged image uploaded"
        );
        Ok(())
    }

    fn apply(&self, result: &DetectionResult) -> Result<ApplyOutcome, CycleError> {
        Ok(self.state.offer(result, ResultSource::RequestCycle)?)
    }

    // A file staged while the cycle ran is newer than the one sent; keep it.
    fn clear_staged_if(&self, submitted: &StagedImage) {
        let mut staged = lock(&self.staged);
        if staged.as_ref() == Some(submitted) {
            *staged = None;
            drop(staged);
            self.state.update_ui(|ui| ui.clear_staged_file());
        }
    }
}

impl std::fmt::Debug for RequestCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCycle")
            .field("in_flight", &self.in_flight())
            .field("elapsed", &self.elapsed())
            .finish_non_exhaustive()
    }
}

/// Holds the in-flight flag for the duration of one cycle.
struct InFlightGuard<'a> {
    cycle: &'a RequestCycle,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(cycle: &'a RequestCycle) -> Option<Self> {
        cycle
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        cycle.state.update_ui(|ui| ui.begin_request());
        lock(&cycle.timer).start();
        debug!(stage = "request_cycle", action = "begin", "request cycle started");
        Some(Self { cycle })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.cycle.timer).stop();
        self.cycle.state.update_ui(|ui| ui.end_request());
        self.cycle.in_flight.store(false, Ordering::Release);
        debug!(stage = "request_cycle", action = "end", "request cycle finished");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
