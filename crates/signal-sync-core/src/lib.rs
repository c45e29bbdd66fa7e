#![warn(missing_docs)]
//! # signal-sync-core
//!
//! ## Purpose
//! Defines the pure result-application model used across the `signal-sync`
//! workspace.
//!
//! ## Responsibilities
//! - Project a [`DetectionResult`] into the UI-ready [`ViewModel`].
//! - Derive traffic-signal timing when the backend omits phases.
//! - Tier total object counts into a [`DensityLevel`].
//! - Gate result application on a monotonic timestamp ([`TimestampGate`]).
//! - Resolve image references into cache-defeated display URLs.
//!
//! ## Data flow
//! Request cycle or poller receives a [`DetectionResult`] -> the shared
//! [`TimestampGate`] decides whether it is newer -> [`build_view_model`]
//! produces a complete replacement [`ViewModel`].
//!
//! ## Ownership and lifetimes
//! View models own every string they carry so they can be swapped atomically
//! into UI state without borrowing from the payload they came from.
//!
//! ## Error model
//! Payloads that report a failure are rejected with [`CoreError`]; partial
//! payloads are never errors and degrade to documented defaults.
//!
//! ## Example
//! ```rust
//! use signal_sync_contract::parse_detection_result;
//! use signal_sync_core::{build_view_model, DensityLevel, ImageResolver};
//!
//! let resolver = ImageResolver::new("http://127.0.0.1:5000/").unwrap();
//! let result = parse_detection_result(r#"{"counts":[2,1,0,3,0,1],"red_seconds":30}"#).unwrap();
//! let view = build_view_model(&result, &resolver, 1).unwrap();
//! assert_eq!(view.total_count, 7);
//! assert_eq!(view.density, DensityLevel::Medium);
//! assert_eq!(view.signal_timing.green, 27);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use signal_sync_contract::{DetectionResult, TimestampField};
use thiserror::Error;
use url::Url;

/// Number of detection classes the backend reports by default.
pub const DEFAULT_CLASS_COUNT: usize = 6;

/// Yellow phase used when the backend does not report one.
pub const DEFAULT_YELLOW_SECONDS: u32 = 3;

/// Query parameter carrying the cache-defeating token.
pub const CACHE_BUST_PARAM: &str = "t";

/// Traffic-signal phase durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalTiming {
    /// Green phase.
    pub green: u32,
    /// Yellow phase.
    pub yellow: u32,
    /// Red phase (total cycle time).
    pub red: u32,
}

/// Derives signal timing from a possibly partial result.
///
/// # Semantics
/// - `yellow` defaults to [`DEFAULT_YELLOW_SECONDS`].
/// - `red` is `total_seconds`, else `red_seconds`, else `0`.
/// - `green` is taken as given, else `max(0, red - yellow)`.
pub fn derive_signal_timing(result: &DetectionResult) -> SignalTiming {
    let yellow = result.yellow_seconds.unwrap_or(DEFAULT_YELLOW_SECONDS);
    let red = result.total_seconds.or(result.red_seconds).unwrap_or(0);
    let green = result
        .green_seconds
        .unwrap_or_else(|| red.saturating_sub(yellow));

    SignalTiming { green, yellow, red }
}

/// Traffic density tier derived from the total object count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DensityLevel {
    /// Fewer than 5 objects.
    Low,
    /// 5 to 10 objects inclusive.
    Medium,
    /// 11 to 15 objects inclusive.
    Elevated,
    /// More than 15 objects.
    High,
}

impl DensityLevel {
    /// Maps a total count onto its tier.
    pub fn from_total(total: u64) -> Self {
        match total {
            0..=4 => Self::Low,
            5..=10 => Self::Medium,
            11..=15 => Self::Elevated,
            _ => Self::High,
        }
    }

    /// Human-readable tier label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::Elevated => "Elevated",
            Self::High => "High",
        }
    }
}

/// UI-ready projection of the latest accepted detection result.
///
/// Replaced as a whole on every accepted result; never partially mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    /// Ordering key of the result this view was built from.
    pub timestamp: Option<u64>,
    /// Per-class counts; `None` when the payload carried no usable counts.
    pub class_counts: Option<Vec<u32>>,
    /// Sum of all per-class counts.
    pub total_count: u64,
    /// Density tier of `total_count`.
    pub density: DensityLevel,
    /// Derived signal schedule.
    pub signal_timing: SignalTiming,
    /// Cache-defeated source image URL.
    pub original_image_url: Option<String>,
    /// Cache-defeated annotated image URL.
    pub processed_image_url: Option<String>,
    /// Stable annotated image URL for downloading.
    pub download_url: Option<String>,
    /// Scene brightness reported by the backend.
    pub brightness: Option<f64>,
}

impl ViewModel {
    /// Returns the count shown in per-class cell `index`, if any.
    pub fn class_cell(&self, index: usize) -> Option<u32> {
        self.class_counts
            .as_ref()
            .and_then(|counts| counts.get(index).copied())
    }
}

/// Builds a complete view model from one detection result.
///
/// `cache_token` is appended to every fetched image URL so a cached image at
/// the same path is never reused.
///
/// # Errors
/// Returns [`CoreError::ResultReportsFailure`] when the payload carries an
/// error indicator.
pub fn build_view_model(
    result: &DetectionResult,
    resolver: &ImageResolver,
    cache_token: u64,
) -> Result<ViewModel, CoreError> {
    if let Some(message) = result.failure() {
        return Err(CoreError::ResultReportsFailure(message.to_string()));
    }

    let total_count = result
        .counts
        .as_ref()
        .map(|counts| counts.iter().map(|count| u64::from(*count)).sum())
        .unwrap_or(0);

    Ok(ViewModel {
        timestamp: result.timestamp,
        class_counts: result.counts.clone(),
        total_count,
        density: DensityLevel::from_total(total_count),
        signal_timing: derive_signal_timing(result),
        original_image_url: result
            .input_image_url
            .as_deref()
            .and_then(|reference| resolver.display_url(reference, cache_token)),
        processed_image_url: result
            .processed_image_url
            .as_deref()
            .and_then(|reference| resolver.display_url(reference, cache_token)),
        download_url: result
            .processed_image_url
            .as_deref()
            .and_then(|reference| resolver.resolve(reference)),
        brightness: result.brightness,
    })
}

/// Resolves backend image references against the backend origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResolver {
    base: Url,
}

impl ImageResolver {
    /// Creates a resolver for `base`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidBaseUrl`] when `base` is not an absolute
    /// http(s) URL.
    pub fn new(base: &str) -> Result<Self, CoreError> {
        let parsed = Url::parse(base)
            .map_err(|error| CoreError::InvalidBaseUrl(format!("{base}: {error}")))?;
        Self::from_url(parsed)
    }

    /// Creates a resolver from an already-parsed URL.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidBaseUrl`] for non-http(s) schemes.
    pub fn from_url(base: Url) -> Result<Self, CoreError> {
        if !matches!(base.scheme(), "http" | "https") {
            return Err(CoreError::InvalidBaseUrl(format!(
                "{base}: scheme must be http or https"
            )));
        }
        Ok(Self { base })
    }

    /// Resolves `reference` to an absolute URL without a cache token.
    ///
    /// `data:` URIs and unresolvable references are returned unchanged.
    pub fn resolve(&self, reference: &str) -> Option<String> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        if is_data_uri(reference) {
            return Some(reference.to_string());
        }

        match self.base.join(reference) {
            Ok(url) => Some(url.into()),
            Err(_) => Some(reference.to_string()),
        }
    }

    /// Resolves `reference` and stamps it with `t=<cache_token>`.
    ///
    /// An existing `t` parameter is replaced; other query pairs are kept.
    /// `data:` URIs are returned unchanged since a query would corrupt them.
    pub fn display_url(&self, reference: &str, cache_token: u64) -> Option<String> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        if is_data_uri(reference) {
            return Some(reference.to_string());
        }

        let Ok(mut url) = self.base.join(reference) else {
            return Some(reference.to_string());
        };

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != CACHE_BUST_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair(CACHE_BUST_PARAM, &cache_token.to_string());

        Some(url.into())
    }
}

fn is_data_uri(reference: &str) -> bool {
    reference
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

/// Source of a detection result competing for the shared gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    /// User-triggered request cycle.
    RequestCycle,
    /// Background poll of the shared last-result resource.
    Poller,
}

/// Outcome of offering a result timestamp to the [`TimestampGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Result is strictly newer; the gate advanced.
    Advanced {
        /// Gate value before this result.
        previous: u64,
    },
    /// Request-cycle result without a timestamp; apply without advancing.
    Untimed,
    /// Result is not newer than the last applied one; discard it.
    Stale {
        /// Gate value that rejected the result.
        last_applied: u64,
    },
}

impl GateDecision {
    /// Returns `true` when the offered result should be applied.
    pub fn should_apply(self) -> bool {
        !matches!(self, Self::Stale { .. })
    }
}

/// Monotonic timestamp gate shared by every result source.
///
/// `last_applied` only ever increases; `0` means nothing has been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampGate {
    last_applied: u64,
}

impl TimestampGate {
    /// Creates an unset gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the greatest timestamp applied so far (`0` when unset).
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Compares `timestamp` against the gate and advances it when newer.
    ///
    /// # Semantics
    /// - `Value(ts)` with `ts > last_applied` advances the gate.
    /// - `Value(ts)` otherwise is stale, whatever its source.
    /// - `Absent` from a request cycle is applied without advancing; from the
    ///   poller it is stale, since an untimed shared resource cannot be ordered.
    /// - `Invalid` is always stale.
    pub fn offer(&mut self, timestamp: TimestampField, source: ResultSource) -> GateDecision {
        match (timestamp, source) {
            (TimestampField::Value(timestamp), _) if timestamp > self.last_applied => {
                let previous = self.last_applied;
                self.last_applied = timestamp;
                GateDecision::Advanced { previous }
            }
            (TimestampField::Absent, ResultSource::RequestCycle) => GateDecision::Untimed,
            _ => GateDecision::Stale {
                last_applied: self.last_applied,
            },
        }
    }
}

/// Produces strictly increasing cache-defeating tokens.
///
/// Tokens follow wall-clock milliseconds but never repeat, even when two
/// images are displayed within the same millisecond.
#[derive(Debug, Default)]
pub struct CacheBuster {
    last: AtomicU64,
}

impl CacheBuster {
    /// Creates a buster whose first token is the current time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next token based on the system clock.
    pub fn next_token(&self) -> u64 {
        self.next_with(unix_millis())
    }

    /// Returns the next token given the current time in milliseconds.
    pub fn next_with(&self, now_ms: u64) -> u64 {
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now_ms.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        now_ms.max(previous.saturating_add(1))
    }
}

/// Current Unix time in milliseconds (`0` if the clock is before the epoch).
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Error type for result application.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload carries an explicit error indicator.
    #[error("detection failed: {0}")]
    ResultReportsFailure(String),
    /// Backend origin is not a usable absolute URL.
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),
}
