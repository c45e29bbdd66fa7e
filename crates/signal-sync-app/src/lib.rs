#![warn(missing_docs)]
//! # signal-sync-app
//!
//! ## Purpose
//! Orchestrates the request cycle, the background poller, the elapsed timer
//! and UI state for the `signal-sync` client.
//!
//! ## Responsibilities
//! - Run user-triggered request cycles with at most one in flight.
//! - Poll the shared last-result resource on a fixed cadence.
//! - Route every successful result through one monotonic timestamp gate.
//! - Load configuration from the environment and expose the build version.
//!
//! ## Data flow
//! Trigger or poll tick -> [`signal_sync_transport::DetectionBackend`] ->
//! [`SyncState::offer`] (gate + view model) -> `watch` channel -> renderer.
//!
//! ## Ownership and lifetimes
//! [`SyncState`] is shared behind an `Arc` by the request cycle and the
//! poller. Background tasks hold a cancellation token and are stopped before
//! the coordinator is dropped.
//!
//! ## Error model
//! Configuration and wiring failures surface as [`AppError`]. Request-cycle
//! failures become UI error text; poll failures are logged and swallowed.

mod config;
mod coordinator;
mod poller;
mod request_cycle;
mod state;

pub use config::{
    DEFAULT_BASE_URL, DEFAULT_POLL_INTERVAL_MS, ENV_BASE_URL, ENV_CLASS_COUNT, ENV_CONFIDENCE,
    ENV_IOU, ENV_POLL_INTERVAL_MS, ENV_POLLING_ENABLED, ENV_REQUEST_TIMEOUT_MS, ENV_TIMER_TICK_MS,
    SyncConfig, flag_enabled,
};
pub use coordinator::SyncCoordinator;
pub use poller::{PollOutcome, ResultPoller};
pub use request_cycle::{CycleError, CycleOutcome, CycleRequest, RequestCycle};
pub use state::{ApplyOutcome, SyncState};

use signal_sync_contract::ContractError;
use signal_sync_core::CoreError;
use signal_sync_timer::TimerError;
use signal_sync_transport::TransportError;
use thiserror::Error;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("SIGNAL_SYNC_VERSION");

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Version label shown in the UI header.
pub fn version_label() -> String {
    format!("v{APP_VERSION}")
}

/// Application-level error wrapping subsystem failures.
#[derive(Debug, Error)]
pub enum AppError {
    /// An environment value could not be used.
    #[error("config error: {0}")]
    Config(String),
    /// Timer configuration was rejected.
    #[error("timer error: {0}")]
    Timer(#[from] TimerError),
    /// Detection parameters were rejected.
    #[error("contract error: {0}")]
    Contract(#[from] ContractError),
    /// Endpoint or transport setup failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Core setup failed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}
