//! Shared fixtures for app integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use signal_sync_app::{SyncConfig, SyncCoordinator};
use signal_sync_contract::{DetectionParams, DetectionResult, UploadAck};
use signal_sync_transport::{DetectionBackend, StagedImage, TransportError};
use tokio::sync::Semaphore;

/// In-memory backend answering from per-endpoint queues.
///
/// Empty queues answer with a network failure. Captures can be held open by
/// [`ScriptedBackend::hold_captures`] until [`ScriptedBackend::release_capture`].
#[derive(Default)]
pub struct ScriptedBackend {
    uploads: Mutex<VecDeque<Result<UploadAck, TransportError>>>,
    captures: Mutex<VecDeque<Result<DetectionResult, TransportError>>>,
    detections: Mutex<VecDeque<Result<DetectionResult, TransportError>>>,
    polls: Mutex<VecDeque<Result<Option<DetectionResult>, TransportError>>>,
    upload_calls: AtomicUsize,
    capture_calls: AtomicUsize,
    detect_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    poll_tokens: Mutex<Vec<u64>>,
    capture_gate: Mutex<Option<Arc<Semaphore>>>,
    last_params: Mutex<Option<DetectionParams>>,
}

#[allow(dead_code)]
impl ScriptedBackend {
    /// Creates a backend with empty queues.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_upload(&self, response: Result<UploadAck, TransportError>) {
        self.uploads.lock().expect("uploads lock").push_back(response);
    }

    pub fn push_capture(&self, response: Result<DetectionResult, TransportError>) {
        self.captures.lock().expect("captures lock").push_back(response);
    }

    pub fn push_detection(&self, response: Result<DetectionResult, TransportError>) {
        self.detections
            .lock()
            .expect("detections lock")
            .push_back(response);
    }

    pub fn push_poll(&self, response: Result<Option<DetectionResult>, TransportError>) {
        self.polls.lock().expect("polls lock").push_back(response);
    }

    /// Makes every capture wait for one [`release_capture`](Self::release_capture).
    pub fn hold_captures(&self) {
        *self.capture_gate.lock().expect("gate lock") = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_capture(&self) {
        if let Some(gate) = self.capture_gate.lock().expect("gate lock").as_ref() {
            gate.add_permits(1);
        }
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    /// Cache tokens passed to each shared-result fetch, in call order.
    pub fn poll_tokens(&self) -> Vec<u64> {
        self.poll_tokens.lock().expect("tokens lock").clone()
    }

    pub fn last_params(&self) -> Option<DetectionParams> {
        self.last_params.lock().expect("params lock").clone()
    }
}

fn unscripted() -> TransportError {
    TransportError::Network("connection refused".to_string())
}

#[async_trait]
impl DetectionBackend for ScriptedBackend {
    async fn upload_image(&self, _image: &StagedImage) -> Result<UploadAck, TransportError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.uploads
            .lock()
            .expect("uploads lock")
            .pop_front()
            .unwrap_or_else(|| Err(unscripted()))
    }

    async fn capture_and_detect(&self) -> Result<DetectionResult, TransportError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.capture_gate.lock().expect("gate lock").clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate open").forget();
        }
        self.captures
            .lock()
            .expect("captures lock")
            .pop_front()
            .unwrap_or_else(|| Err(unscripted()))
    }

    async fn upload_and_detect(
        &self,
        _image: &StagedImage,
        params: &DetectionParams,
    ) -> Result<DetectionResult, TransportError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().expect("params lock") = Some(params.clone());
        self.detections
            .lock()
            .expect("detections lock")
            .pop_front()
            .unwrap_or_else(|| Err(unscripted()))
    }

    async fn fetch_last_result(
        &self,
        cache_token: u64,
    ) -> Result<Option<DetectionResult>, TransportError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.poll_tokens.lock().expect("tokens lock").push(cache_token);
        self.polls
            .lock()
            .expect("polls lock")
            .pop_front()
            .unwrap_or_else(|| Err(unscripted()))
    }
}

/// Successful result with `counts` and an explicit red phase.
#[allow(dead_code)]
pub fn result_at(timestamp: u64, counts: &[u32]) -> DetectionResult {
    DetectionResult {
        timestamp: Some(timestamp),
        counts: Some(counts.to_vec()),
        input_image_url: Some("data:image/jpeg;base64,AAAA".to_string()),
        processed_image_url: Some(format!("static/processed_{timestamp}.jpg")),
        red_seconds: Some(30),
        ..DetectionResult::default()
    }
}

/// Result carrying an explicit error indicator.
#[allow(dead_code)]
pub fn failed_result(message: &str) -> DetectionResult {
    DetectionResult {
        error: Some(message.to_string()),
        ..DetectionResult::default()
    }
}

#[allow(dead_code)]
pub fn staged(name: &str) -> StagedImage {
    StagedImage::new(name, vec![0xFF, 0xD8, 0xFF, 0xE0]).expect("staged fixture should be valid")
}

/// Coordinator over `backend` with default config and a fixed base URL.
#[allow(dead_code)]
pub fn coordinator(backend: &Arc<ScriptedBackend>) -> SyncCoordinator {
    let config = SyncConfig {
        base_url: "http://detector.test:5000/".to_string(),
        ..SyncConfig::default()
    };
    SyncCoordinator::new(config, backend.clone()).expect("coordinator fixture should build")
}
