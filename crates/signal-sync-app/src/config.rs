//! Environment-driven client configuration.

use std::time::Duration;

use signal_sync_contract::DetectionParams;
use signal_sync_core::DEFAULT_CLASS_COUNT;
use signal_sync_timer::TickConfig;

use crate::AppError;

/// Backend origin.
pub const ENV_BASE_URL: &str = "SIGNAL_SYNC_BASE_URL";
/// Poll interval in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "SIGNAL_SYNC_POLL_INTERVAL_MS";
/// Elapsed-timer tick in milliseconds.
pub const ENV_TIMER_TICK_MS: &str = "SIGNAL_SYNC_TIMER_TICK_MS";
/// Optional per-request timeout in milliseconds.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "SIGNAL_SYNC_REQUEST_TIMEOUT_MS";
/// Poller kill switch.
pub const ENV_POLLING_ENABLED: &str = "SIGNAL_SYNC_POLLING_ENABLED";
/// Number of per-class count cells.
pub const ENV_CLASS_COUNT: &str = "SIGNAL_SYNC_CLASS_COUNT";
/// Confidence threshold for upload-and-detect.
pub const ENV_CONFIDENCE: &str = "SIGNAL_SYNC_CONFIDENCE";
/// IoU threshold for upload-and-detect.
pub const ENV_IOU: &str = "SIGNAL_SYNC_IOU";

/// Default backend origin.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/";
/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Validated client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Backend origin.
    pub base_url: String,
    /// Milliseconds between polls of the shared last-result resource.
    pub poll_interval_ms: u64,
    /// Elapsed-timer cadence.
    pub timer_tick: TickConfig,
    /// Per-request timeout; `None` leaves requests unbounded.
    pub request_timeout_ms: Option<u64>,
    /// Whether the background poller runs at all.
    pub polling_enabled: bool,
    /// Number of per-class count cells shown.
    pub class_count: usize,
    /// Thresholds sent with upload-and-detect requests.
    pub detection: DetectionParams,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timer_tick: TickConfig::default(),
            request_timeout_ms: None,
            polling_enabled: true,
            class_count: DEFAULT_CLASS_COUNT,
            detection: DetectionParams::default(),
        }
    }
}

impl SyncConfig {
    /// Loads configuration from process environment variables.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for unparseable or out-of-range values.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    ///
    /// Unset and blank keys fall back to defaults; set keys must parse.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for unparseable or out-of-range values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let poll_interval_ms = match read(ENV_POLL_INTERVAL_MS) {
            Some(raw) => parse_number::<u64>(ENV_POLL_INTERVAL_MS, &raw)?,
            None => defaults.poll_interval_ms,
        };
        if poll_interval_ms == 0 {
            return Err(AppError::Config(format!(
                "{ENV_POLL_INTERVAL_MS} must be greater than zero"
            )));
        }

        let timer_tick = match read(ENV_TIMER_TICK_MS) {
            Some(raw) => TickConfig::new(parse_number(ENV_TIMER_TICK_MS, &raw)?)?,
            None => defaults.timer_tick,
        };

        let request_timeout_ms = read(ENV_REQUEST_TIMEOUT_MS)
            .map(|raw| parse_number::<u64>(ENV_REQUEST_TIMEOUT_MS, &raw))
            .transpose()?;
        if request_timeout_ms == Some(0) {
            return Err(AppError::Config(format!(
                "{ENV_REQUEST_TIMEOUT_MS} must be greater than zero when set"
            )));
        }

        let class_count = match read(ENV_CLASS_COUNT) {
            Some(raw) => parse_number::<usize>(ENV_CLASS_COUNT, &raw)?,
            None => defaults.class_count,
        };

        let confidence = match read(ENV_CONFIDENCE) {
            Some(raw) => parse_number::<f32>(ENV_CONFIDENCE, &raw)?,
            None => defaults.detection.confidence,
        };
        let iou = match read(ENV_IOU) {
            Some(raw) => parse_number::<f32>(ENV_IOU, &raw)?,
            None => defaults.detection.iou,
        };

        Ok(Self {
            base_url: read(ENV_BASE_URL).unwrap_or(defaults.base_url),
            poll_interval_ms,
            timer_tick,
            request_timeout_ms,
            polling_enabled: read(ENV_POLLING_ENABLED).is_none_or(|raw| flag_enabled(&raw)),
            class_count,
            detection: DetectionParams::new(confidence, iou)?,
        })
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Request timeout as a duration, if configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Interprets a kill-switch value.
///
/// `0`, `false` and `off` (case-insensitive) disable; anything else enables.
pub fn flag_enabled(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    !(normalized == "0" || normalized == "false" || normalized == "off")
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|error| AppError::Config(format!("{key}={raw:?}: {error}")))
}
