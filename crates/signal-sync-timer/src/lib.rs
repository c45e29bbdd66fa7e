#![warn(missing_docs)]
//! # signal-sync-timer
//!
//! ## Purpose
//! Provides the elapsed-time indicator bound to one in-flight request.
//!
//! ## Responsibilities
//! - Validate the tick cadence ([`TickConfig`]).
//! - Emit `HH:MM:SS` elapsed strings while a request is running.
//! - Guarantee at most one live tick source per [`ElapsedTimer`].
//!
//! ## Data flow
//! Request cycle calls [`ElapsedTimer::start`] -> a tokio task publishes the
//! formatted elapsed time into a `watch` channel -> UI subscribers render it.
//! [`ElapsedTimer::stop`] cancels the task and resets the value to
//! [`ZERO_ELAPSED`].
//!
//! ## Ownership and lifetimes
//! Each running tick task is owned through a stored `CancellationToken` and
//! `JoinHandle`; dropping the timer cancels it, so no tick outlives its owner.
//!
//! ## Error model
//! Only configuration can fail ([`TimerError`]). Starting and stopping are
//! infallible and idempotent.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Displayed value while no request is running.
pub const ZERO_ELAPSED: &str = "00:00:00";

/// Fastest allowed tick cadence.
pub const MIN_TICK_MS: u64 = 100;

/// Slowest allowed tick cadence.
pub const MAX_TICK_MS: u64 = 200;

/// Default tick cadence.
pub const DEFAULT_TICK_MS: u64 = 100;

/// Tick cadence configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickConfig {
    /// Milliseconds between published ticks.
    pub interval_ms: u64,
}

impl TickConfig {
    /// Creates a validated tick configuration.
    ///
    /// # Errors
    /// Returns [`TimerError::InvalidTickInterval`] outside
    /// `MIN_TICK_MS..=MAX_TICK_MS`.
    pub fn new(interval_ms: u64) -> Result<Self, TimerError> {
        if !(MIN_TICK_MS..=MAX_TICK_MS).contains(&interval_ms) {
            return Err(TimerError::InvalidTickInterval(interval_ms));
        }
        Ok(Self { interval_ms })
    }

    /// Returns the tick period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_TICK_MS,
        }
    }
}

/// Formats an elapsed duration as zero-padded `HH:MM:SS`.
///
/// Sub-second precision is truncated. Hours are not capped at 99.
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3_600,
        (seconds % 3_600) / 60,
        seconds % 60
    )
}

struct ActiveTicker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Counts tick tasks that have not yet been dropped.
struct LiveTicker(Arc<AtomicUsize>);

impl LiveTicker {
    fn register(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveTicker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Elapsed-time indicator for one in-flight operation.
///
/// # Notes
/// [`start`](Self::start) spawns onto the ambient tokio runtime and must be
/// called from within one.
pub struct ElapsedTimer {
    config: TickConfig,
    display: watch::Sender<String>,
    live_tickers: Arc<AtomicUsize>,
    active: Option<ActiveTicker>,
}

impl ElapsedTimer {
    /// Creates a stopped timer showing [`ZERO_ELAPSED`].
    pub fn new(config: TickConfig) -> Self {
        let (display, _) = watch::channel(ZERO_ELAPSED.to_string());
        Self {
            config,
            display,
            live_tickers: Arc::new(AtomicUsize::new(0)),
            active: None,
        }
    }

    /// Subscribes to displayed elapsed values.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.display.subscribe()
    }

    /// Returns the currently displayed value.
    pub fn current(&self) -> String {
        self.display.borrow().clone()
    }

    /// Returns `true` while a tick source is active.
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Returns how many tick tasks are still alive, including cancelled ones
    /// the runtime has not dropped yet.
    pub fn live_tickers(&self) -> usize {
        self.live_tickers.load(Ordering::SeqCst)
    }

    /// Starts ticking from zero, cancelling any previous tick source first.
    pub fn start(&mut self) {
        let restarted = self.cancel_active();
        reset_display(&self.display);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let display = self.display.clone();
        let period = self.config.interval();
        let started_at = Instant::now();
        let live = LiveTicker::register(&self.live_tickers);

        let handle = tokio::spawn(async move {
            let _live = live;
            let mut ticks = tokio::time::interval_at(started_at + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticks.tick() => {
                        let text = format_elapsed(started_at.elapsed());
                        // Holding the channel lock while checking the token means a
                        // concurrent stop() always writes the final value.
                        display.send_if_modified(|current| {
                            if token.is_cancelled() || *current == text {
                                return false;
                            }
                            *current = text;
                            true
                        });
                    }
                }
            }
        });

        self.active = Some(ActiveTicker { cancel, handle });
        debug!(stage = "timer", action = "start", restarted, "elapsed timer started");
    }

    /// Stops ticking and resets the display to [`ZERO_ELAPSED`].
    ///
    /// Safe to call when never started.
    pub fn stop(&mut self) {
        if self.cancel_active() {
            debug!(stage = "timer", action = "stop", "elapsed timer stopped");
        }
        reset_display(&self.display);
    }

    fn cancel_active(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                active.cancel.cancel();
                active.handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Default for ElapsedTimer {
    fn default() -> Self {
        Self::new(TickConfig::default())
    }
}

impl Drop for ElapsedTimer {
    fn drop(&mut self) {
        self.cancel_active();
    }
}

fn reset_display(display: &watch::Sender<String>) {
    display.send_if_modified(|current| {
        if current == ZERO_ELAPSED {
            return false;
        }
        *current = ZERO_ELAPSED.to_string();
        true
    });
}

/// Timer configuration errors.
#[derive(Debug, Error)]
pub enum TimerError {
    /// Tick cadence outside the supported window.
    #[error("tick interval must be within {MIN_TICK_MS}..={MAX_TICK_MS} ms, got {0}")]
    InvalidTickInterval(u64),
}
