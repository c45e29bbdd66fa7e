#![warn(missing_docs)]
//! # signal-sync-ui
//!
//! ## Purpose
//! Defines the UI-facing state model for the `signal-sync` client.
//!
//! ## Responsibilities
//! - Represent the trigger, loading, error and status-light state of the
//!   request cycle.
//! - Hold the latest accepted [`ViewModel`] and the per-class count cells.
//! - Project state into display-ready text ([`DashboardSnapshot`]).
//!
//! ## Data flow
//! Request cycle and poller events mutate [`UiState`] through its reducer
//! methods; renderers read [`project_dashboard`] output.
//!
//! ## Ownership and lifetimes
//! The view model is held behind an `Arc` and swapped whole, so a renderer
//! cloning the state never observes counts from one result beside images from
//! another.
//!
//! ## Error model
//! This crate favors explicit state over recoverable errors. Invalid
//! combinations are prevented by the reducer methods.

use std::fmt;
use std::sync::Arc;

use signal_sync_core::ViewModel;

/// Three-state status light shown next to the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLight {
    /// Idle and the last cycle (if any) succeeded.
    Ready,
    /// A request cycle is in flight.
    Processing,
    /// The last request cycle failed.
    Error,
}

/// Aggregate UI state.
#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    /// App version string.
    pub version: String,
    /// Whether the capture/detect trigger accepts input.
    pub trigger_enabled: bool,
    /// Whether the loading indicator is shown.
    pub loading: bool,
    /// Message shown in the error slot.
    pub error_message: Option<String>,
    /// Status light.
    pub status: StatusLight,
    /// Latest accepted view model.
    pub view: Option<Arc<ViewModel>>,
    /// Per-class count cells; only rewritten by results carrying counts.
    pub class_cells: Vec<Option<u32>>,
    /// Label of the staged upload, if a file is staged.
    pub staged_file: Option<String>,
}

impl UiState {
    /// Creates initial UI state with `class_count` empty count cells.
    pub fn new(version: impl Into<String>, class_count: usize) -> Self {
        Self {
            version: version.into(),
            trigger_enabled: true,
            loading: false,
            error_message: None,
            status: StatusLight::Ready,
            view: None,
            class_cells: vec![None; class_count],
            staged_file: None,
        }
    }

    /// Returns `true` when the trigger accepts a new request cycle.
    pub fn can_trigger(&self) -> bool {
        self.trigger_enabled
    }

    /// Enters the in-flight state: trigger disabled, loading shown, error cleared.
    pub fn begin_request(&mut self) {
        self.trigger_enabled = false;
        self.loading = true;
        self.error_message = None;
        self.status = StatusLight::Processing;
    }

    /// Records a request cycle failure.
    pub fn fail_request(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.status = StatusLight::Error;
    }

    /// Leaves the in-flight state, keeping any failure recorded meanwhile.
    pub fn end_request(&mut self) {
        self.trigger_enabled = true;
        self.loading = false;
        if self.status == StatusLight::Processing {
            self.status = StatusLight::Ready;
        }
    }

    /// Replaces the displayed view model.
    ///
    /// Only the cells covered by the view's per-class counts are rewritten;
    /// the rest keep their previous value. Counts beyond the configured cells
    /// are summed but not shown.
    pub fn apply_view(&mut self, view: ViewModel) {
        if let Some(counts) = &view.class_counts {
            for (cell, count) in self.class_cells.iter_mut().zip(counts) {
                *cell = Some(*count);
            }
        }
        self.view = Some(Arc::new(view));
    }

    /// Shows `label` as the staged upload.
    pub fn stage_file(&mut self, label: impl Into<String>) {
        self.staged_file = Some(label.into());
    }

    /// Clears the staged upload label.
    pub fn clear_staged_file(&mut self) {
        self.staged_file = None;
    }
}

/// Flat, display-ready projection of [`UiState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSnapshot {
    /// Status light text.
    pub status: String,
    /// Elapsed time of the current request cycle, `HH:MM:SS`.
    pub elapsed: String,
    /// Total object count.
    pub total: String,
    /// Density tier label.
    pub density: String,
    /// Per-class count cells (`-` when never filled).
    pub class_cells: Vec<String>,
    /// Green phase, e.g. `27s`.
    pub green: String,
    /// Yellow phase.
    pub yellow: String,
    /// Red phase.
    pub red: String,
    /// Cache-defeated original image URL.
    pub original_image: Option<String>,
    /// Cache-defeated processed image URL.
    pub processed_image: Option<String>,
    /// Stable processed image URL for downloading.
    pub download: Option<String>,
    /// Brightness with two decimals.
    pub brightness: Option<String>,
    /// Error slot text.
    pub error: Option<String>,
    /// Staged upload label.
    pub staged_file: Option<String>,
}

/// Projects UI state and the elapsed-time display into display-ready text.
pub fn project_dashboard(state: &UiState, elapsed: &str) -> DashboardSnapshot {
    let view = state.view.as_deref();
    let placeholder = || "-".to_string();

    DashboardSnapshot {
        status: status_text(state.status).to_string(),
        elapsed: elapsed.to_string(),
        total: view.map_or_else(placeholder, |view| view.total_count.to_string()),
        density: view.map_or_else(placeholder, |view| view.density.label().to_string()),
        class_cells: state
            .class_cells
            .iter()
            .map(|cell| cell.map_or_else(placeholder, |count| count.to_string()))
            .collect(),
        green: view.map_or_else(placeholder, |view| seconds(view.signal_timing.green)),
        yellow: view.map_or_else(placeholder, |view| seconds(view.signal_timing.yellow)),
        red: view.map_or_else(placeholder, |view| seconds(view.signal_timing.red)),
        original_image: view.and_then(|view| view.original_image_url.clone()),
        processed_image: view.and_then(|view| view.processed_image_url.clone()),
        download: view.and_then(|view| view.download_url.clone()),
        brightness: view
            .and_then(|view| view.brightness)
            .map(|brightness| format!("{brightness:.2}")),
        error: state.error_message.clone(),
        staged_file: state.staged_file.clone(),
    }
}

impl fmt::Display for DashboardSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "status     {}", self.status)?;
        writeln!(f, "elapsed    {}", self.elapsed)?;
        writeln!(f, "vehicles   {} ({})", self.total, self.density)?;
        writeln!(f, "per class  {}", self.class_cells.join(" | "))?;
        writeln!(
            f,
            "signal     green {} / yellow {} / red {}",
            self.green, self.yellow, self.red
        )?;
        if let Some(brightness) = &self.brightness {
            writeln!(f, "brightness {brightness}")?;
        }
        if let Some(original) = &self.original_image {
            writeln!(f, "original   {}", abbreviate(original))?;
        }
        if let Some(processed) = &self.processed_image {
            writeln!(f, "processed  {processed}")?;
        }
        if let Some(download) = &self.download {
            writeln!(f, "download   {download}")?;
        }
        if let Some(staged) = &self.staged_file {
            writeln!(f, "staged     {staged}")?;
        }
        if let Some(error) = &self.error {
            writeln!(f, "error      {error}")?;
        }
        Ok(())
    }
}

fn status_text(status: StatusLight) -> &'static str {
    match status {
        StatusLight::Ready => "ready",
        StatusLight::Processing => "processing",
        StatusLight::Error => "error",
    }
}

fn seconds(value: u32) -> String {
    format!("{value}s")
}

// Inline `data:` images are far too long for a terminal line.
fn abbreviate(reference: &str) -> String {
    const LIMIT: usize = 96;
    match reference.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &reference[..cut]),
        None => reference.to_string(),
    }
}
