#![warn(missing_docs)]
//! # signal-sync-transport
//!
//! ## Purpose
//! Implements the client side of the detection backend's HTTP surface.
//!
//! ## Responsibilities
//! - Validate the backend origin and derive every endpoint from it.
//! - Define the [`DetectionBackend`] seam used by request cycles and the poller.
//! - Provide the reqwest-based [`HttpBackend`].
//! - Classify transport failures into [`TransportError`].
//!
//! ## Data flow
//! Request cycle / poller -> [`DetectionBackend`] -> HTTP -> raw body ->
//! `signal-sync-contract` parsing -> typed result back to the caller.
//!
//! ## Ownership and lifetimes
//! [`StagedImage`] owns its bytes so a staged upload survives across the
//! asynchronous boundary of a request cycle.
//!
//! ## Error model
//! Network failures, non-success statuses and undecodable bodies are
//! [`TransportError`] values. An absent shared result resource is not an
//! error: [`DetectionBackend::fetch_last_result`] returns `Ok(None)`.
//!
//! ## Security and privacy notes
//! Image bytes are never logged; uploads are identified by
//! [`StagedImage::fingerprint`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use sha2::{Digest, Sha256};
use signal_sync_contract::{
    ContractError, DetectionParams, DetectionResult, UploadAck, parse_detection_result,
    parse_upload_ack,
};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Upload-only endpoint path (stages an image for the next capture).
pub const UPLOAD_IMAGE_PATH: &str = "upload_image";
/// Capture-and-detect endpoint path.
pub const CAMERA_CAPTURE_PATH: &str = "camera_capture";
/// Upload-and-detect endpoint path.
pub const UPLOAD_AND_DETECT_PATH: &str = "upload";
/// Shared last-result resource path.
pub const LAST_DETECTION_PATH: &str = "static/last_detection.json";
/// Live camera stream path.
pub const CAMERA_STREAM_PATH: &str = "camera_stream";

/// Query parameter used to defeat caches on polled resources.
pub const CACHE_BUST_PARAM: &str = "t";

/// Backend endpoints derived from one validated origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
    upload_image: Url,
    camera_capture: Url,
    upload_and_detect: Url,
    last_detection: Url,
    camera_stream: Url,
}

impl Endpoints {
    /// Derives all endpoints from `base`.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidEndpoint`] when `base` fails
    /// [`validate_base_url`].
    pub fn new(base: &str) -> Result<Self, TransportError> {
        let base = validate_base_url(base)?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|error| TransportError::InvalidEndpoint(format!("{path}: {error}")))
        };

        Ok(Self {
            upload_image: join(UPLOAD_IMAGE_PATH)?,
            camera_capture: join(CAMERA_CAPTURE_PATH)?,
            upload_and_detect: join(UPLOAD_AND_DETECT_PATH)?,
            last_detection: join(LAST_DETECTION_PATH)?,
            camera_stream: join(CAMERA_STREAM_PATH)?,
            base,
        })
    }

    /// Backend origin, always ending in `/`.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Upload-only endpoint.
    pub fn upload_image(&self) -> &Url {
        &self.upload_image
    }

    /// Capture-and-detect endpoint.
    pub fn camera_capture(&self) -> &Url {
        &self.camera_capture
    }

    /// Upload-and-detect endpoint.
    pub fn upload_and_detect(&self) -> &Url {
        &self.upload_and_detect
    }

    /// Shared last-result resource stamped with a cache-defeating token.
    pub fn last_detection(&self, cache_token: u64) -> Url {
        let mut url = self.last_detection.clone();
        url.query_pairs_mut()
            .append_pair(CACHE_BUST_PARAM, &cache_token.to_string());
        url
    }

    /// Live camera stream, consumed directly as a display source.
    pub fn camera_stream_url(&self) -> &Url {
        &self.camera_stream
    }
}

/// Validates a backend origin.
///
/// The origin must be an absolute http(s) URL with a host and no query or
/// fragment. A missing trailing `/` is added so endpoint joins stay beneath
/// the configured path.
///
/// # Errors
/// Returns [`TransportError::InvalidEndpoint`] on any violation.
pub fn validate_base_url(base: &str) -> Result<Url, TransportError> {
    let mut parsed = Url::parse(base.trim())
        .map_err(|error| TransportError::InvalidEndpoint(format!("invalid base url: {error}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(TransportError::InvalidEndpoint(
            "base url must use http or https".to_string(),
        ));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(TransportError::InvalidEndpoint(
            "base url must include a host".to_string(),
        ));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(TransportError::InvalidEndpoint(
            "base url must not carry a query or fragment".to_string(),
        ));
    }

    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }

    Ok(parsed)
}

/// Image file selected by the user for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct StagedImage {
    file_name: String,
    bytes: Vec<u8>,
}

impl StagedImage {
    /// Creates a validated staged image.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidImage`] for a blank file name or empty
    /// content.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, TransportError> {
        let file_name = file_name.into();
        if file_name.trim().is_empty() {
            return Err(TransportError::InvalidImage("file name is empty".to_string()));
        }
        if bytes.is_empty() {
            return Err(TransportError::InvalidImage(format!("{file_name} is empty")));
        }
        Ok(Self { file_name, bytes })
    }

    /// Original file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Raw file content.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false`; empty images are rejected on construction.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// MIME type guessed from the file extension.
    pub fn content_type(&self) -> &'static str {
        let extension = self
            .file_name
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_ascii_lowercase());
        match extension.as_deref() {
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("bmp") => "image/bmp",
            Some("webp") => "image/webp",
            _ => "application/octet-stream",
        }
    }

    /// Short log-safe content fingerprint (first 12 hex chars of SHA-256).
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        let mut encoded = hex::encode(digest);
        encoded.truncate(12);
        encoded
    }

    fn to_part(&self) -> Result<Part, TransportError> {
        Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(self.content_type())
            .map_err(|error| TransportError::InvalidImage(error.to_string()))
    }
}

impl std::fmt::Debug for StagedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedImage")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Abstract detection backend used by request cycles and the poller.
#[async_trait]
pub trait DetectionBackend: Send + Sync {
    /// Uploads an image to be used by the next capture.
    ///
    /// # Errors
    /// Returns [`TransportError`] on network or status failure.
    async fn upload_image(&self, image: &StagedImage) -> Result<UploadAck, TransportError>;

    /// Triggers a server-side capture and runs detection on it.
    ///
    /// # Errors
    /// Returns [`TransportError`] on network, status or decode failure.
    async fn capture_and_detect(&self) -> Result<DetectionResult, TransportError>;

    /// Uploads an image with detection parameters and runs detection on it.
    ///
    /// # Errors
    /// Returns [`TransportError`] on network, status or decode failure.
    async fn upload_and_detect(
        &self,
        image: &StagedImage,
        params: &DetectionParams,
    ) -> Result<DetectionResult, TransportError>;

    /// Fetches the shared last-result resource.
    ///
    /// Returns `Ok(None)` when the resource does not exist yet or is empty.
    ///
    /// # Errors
    /// Returns [`TransportError`] on network, unexpected status or decode
    /// failure.
    async fn fetch_last_result(
        &self,
        cache_token: u64,
    ) -> Result<Option<DetectionResult>, TransportError>;
}

/// reqwest-backed [`DetectionBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpBackend {
    /// Creates an HTTP backend.
    ///
    /// `request_timeout` bounds every request when set; `None` leaves requests
    /// unbounded, matching the browser's fetch behavior.
    ///
    /// # Errors
    /// Returns [`TransportError::Network`] when the HTTP client cannot be built.
    pub fn new(
        endpoints: Endpoints,
        request_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|error| TransportError::Network(error.to_string()))?;

        Ok(Self { client, endpoints })
    }

    /// Returns the configured endpoints.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

#[async_trait]
impl DetectionBackend for HttpBackend {
    async fn upload_image(&self, image: &StagedImage) -> Result<UploadAck, TransportError> {
        debug!(
            stage = "transport",
            action = "upload_image",
            file = image.file_name(),
            fingerprint = %image.fingerprint(),
            "uploading staged image"
        );
        let form = Form::new().part("file", image.to_part()?);
        let response = self
            .client
            .post(self.endpoints.upload_image().clone())
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let body = success_body(response).await?;
        if body.trim().is_empty() {
            return Ok(UploadAck {
                success: true,
                error: None,
            });
        }
        Ok(parse_upload_ack(&body)?)
    }

    async fn capture_and_detect(&self) -> Result<DetectionResult, TransportError> {
        debug!(stage = "transport", action = "camera_capture", "requesting capture");
        let response = self
            .client
            .post(self.endpoints.camera_capture().clone())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let body = success_body(response).await?;
        Ok(parse_detection_result(&body)?)
    }

    async fn upload_and_detect(
        &self,
        image: &StagedImage,
        params: &DetectionParams,
    ) -> Result<DetectionResult, TransportError> {
        debug!(
            stage = "transport",
            action = "upload_and_detect",
            file = image.file_name(),
            fingerprint = %image.fingerprint(),
            "uploading image for detection"
        );
        let form = params
            .form_fields()
            .into_iter()
            .fold(Form::new().part("image", image.to_part()?), |form, (key, value)| {
                form.text(key, value)
            });
        let response = self
            .client
            .post(self.endpoints.upload_and_detect().clone())
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let body = success_body(response).await?;
        Ok(parse_detection_result(&body)?)
    }

    async fn fetch_last_result(
        &self,
        cache_token: u64,
    ) -> Result<Option<DetectionResult>, TransportError> {
        let response = self
            .client
            .get(self.endpoints.last_detection(cache_token))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = success_body(response).await?;
        parse_optional_result(&body)
    }
}

/// Parses a shared last-result body, treating blank and `null` as absent.
///
/// # Errors
/// Returns [`TransportError::Decode`] for any other undecodable body.
pub fn parse_optional_result(body: &str) -> Result<Option<DetectionResult>, TransportError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }
    Ok(Some(parse_detection_result(trimmed)?))
}

/// Extracts a backend-supplied error message from a failure body.
pub fn error_detail(body: &str) -> Option<String> {
    parse_upload_ack(body).ok().and_then(|ack| ack.error)
}

async fn success_body(response: reqwest::Response) -> Result<String, TransportError> {
    let status = response.status();
    let body = response.text().await.map_err(map_reqwest_error)?;
    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            detail: error_detail(&body),
        });
    }
    Ok(body)
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(error.to_string())
    }
}

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Backend origin or endpoint is unusable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Staged image is unusable.
    #[error("invalid image: {0}")]
    InvalidImage(String),
    /// Connection-level failure.
    #[error("network failure: {0}")]
    Network(String),
    /// Request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// Backend answered with a non-success status.
    #[error(
        "server error: {status}{}",
        .detail.as_deref().map(|detail| format!(" ({detail})")).unwrap_or_default()
    )]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message carried in the response body, if any.
        detail: Option<String>,
    },
    /// Body could not be decoded.
    #[error("decode failure: {0}")]
    Decode(#[from] ContractError),
}

#[cfg(test)]
mod tests {
    //! Unit tests for endpoint derivation and body classification.

    use super::*;

    #[test]
    fn endpoints_stay_beneath_configured_path() {
        let endpoints = Endpoints::new("http://10.0.0.2:5000/traffic").expect("valid base");
        assert_eq!(
            endpoints.camera_capture().as_str(),
            "http://10.0.0.2:5000/traffic/camera_capture"
        );
        assert_eq!(
            endpoints.last_detection(17).as_str(),
            "http://10.0.0.2:5000/traffic/static/last_detection.json?t=17"
        );
    }

    #[test]
    fn blank_and_null_bodies_are_absent_results() {
        assert!(parse_optional_result("").expect("blank is absent").is_none());
        assert!(parse_optional_result(" null ").expect("null is absent").is_none());
        assert!(parse_optional_result("{\"timestamp\":3}").expect("parses").is_some());
        assert!(parse_optional_result("<html>").is_err());
    }

    #[test]
    fn status_errors_include_backend_detail() {
        let error = TransportError::Status {
            status: 400,
            detail: error_detail(r#"{"error":"No file"}"#),
        };
        assert_eq!(error.to_string(), "server error: 400 (No file)");

        let bare = TransportError::Status {
            status: 502,
            detail: error_detail("Bad Gateway"),
        };
        assert_eq!(bare.to_string(), "server error: 502");
    }
}
