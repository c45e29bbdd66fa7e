#![warn(missing_docs)]
//! # signal-sync-contract
//!
//! ## Purpose
//! Defines the wire schema shared by the detection backend and the client.
//!
//! ## Responsibilities
//! - Parse detection result payloads from any of the three result sources
//!   (capture-and-detect, upload-and-detect, shared last-result resource).
//! - Parse upload acknowledgements.
//! - Describe the detection parameters sent with upload-and-detect requests.
//!
//! ## Data flow
//! Raw JSON body -> [`parse_detection_result`] -> [`DetectionResult`] ->
//! view-model projection in `signal-sync-core`.
//!
//! ## Ownership and lifetimes
//! Parsed values are owned structs so results can outlive the transient
//! network buffers they were decoded from.
//!
//! ## Error model
//! Only undecodable JSON or a non-object body is a [`ContractError`]. Missing
//! or mistyped optional fields are not errors: they decode as absent and the
//! consumer applies its documented defaults.
//!
//! ## Compatibility notes
//! The backend has shipped several payload revisions. Image references arrive
//! as either `processed_image_url` / `input_image_url` or the shorter
//! `processed_image` / `input_image`; both spellings are accepted.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One completed detection pass as reported by the backend.
///
/// Every field is optional on the wire. A payload whose [`error`] is set is a
/// failure report and none of its other fields are trusted.
///
/// [`error`]: DetectionResult::error
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DetectionResult {
    /// Result production time; the sole ordering key between result sources.
    /// Fractional seconds are floored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Set when `timestamp` was present but not a non-negative number.
    #[serde(skip)]
    pub timestamp_invalid: bool,
    /// Per-class object counts. `None` when absent or malformed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<Vec<u32>>,
    /// Reference to the source image (path, absolute URL or `data:` URI).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_image_url: Option<String>,
    /// Reference to the annotated image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_image_url: Option<String>,
    /// Explicit total cycle time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_seconds: Option<u32>,
    /// Explicit red phase in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub red_seconds: Option<u32>,
    /// Explicit yellow phase in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yellow_seconds: Option<u32>,
    /// Explicit green phase in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub green_seconds: Option<u32>,
    /// Scene brightness measured by the backend pre-processor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    /// Failure indicator. When set the payload is not a result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionResult {
    /// Decodes a result from an already-parsed JSON value.
    ///
    /// # Errors
    /// Returns [`ContractError::NotAnObject`] when `value` is not a JSON object.
    pub fn from_value(value: &Value) -> Result<Self, ContractError> {
        let object = value.as_object().ok_or(ContractError::NotAnObject)?;
        let (timestamp, timestamp_invalid) = match object.get("timestamp") {
            None | Some(Value::Null) => (None, false),
            Some(raw) => match timestamp_seconds(raw) {
                Some(seconds) => (Some(seconds), false),
                None => (None, true),
            },
        };

        Ok(Self {
            timestamp,
            timestamp_invalid,
            counts: object.get("counts").and_then(count_array),
            input_image_url: first_string(object, &["input_image_url", "input_image"]),
            processed_image_url: first_string(object, &["processed_image_url", "processed_image"]),
            total_seconds: seconds_field(object, "total_seconds"),
            red_seconds: seconds_field(object, "red_seconds"),
            yellow_seconds: seconds_field(object, "yellow_seconds"),
            green_seconds: seconds_field(object, "green_seconds"),
            brightness: object.get("brightness").and_then(Value::as_f64),
            error: object.get("error").and_then(error_text),
        })
    }

    /// Returns the failure message when this payload reports an error.
    pub fn failure(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Classifies the ordering key for the timestamp gate.
    pub fn timestamp_field(&self) -> TimestampField {
        match self.timestamp {
            Some(seconds) => TimestampField::Value(seconds),
            None if self.timestamp_invalid => TimestampField::Invalid,
            None => TimestampField::Absent,
        }
    }
}

/// Ordering key of a [`DetectionResult`] as it arrived on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    /// No `timestamp` key, or an explicit `null`.
    Absent,
    /// A `timestamp` that is negative, non-finite or not a number.
    Invalid,
    /// Seconds since the epoch.
    Value(u64),
}

impl<'de> Deserialize<'de> for DetectionResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(D::Error::custom)
    }
}

/// Parses a raw JSON body into a [`DetectionResult`].
///
/// # Errors
/// Returns [`ContractError::Decode`] for invalid JSON and
/// [`ContractError::NotAnObject`] for non-object bodies.
pub fn parse_detection_result(raw: &str) -> Result<DetectionResult, ContractError> {
    let value: Value = serde_json::from_str(raw).map_err(ContractError::Decode)?;
    DetectionResult::from_value(&value)
}

/// Acknowledgement returned by the image upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadAck {
    /// Set by the backend when the upload was stored.
    #[serde(default)]
    pub success: bool,
    /// Failure indicator.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_error")]
    pub error: Option<String>,
}

impl UploadAck {
    /// Returns the failure message when the upload was rejected.
    pub fn failure(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Parses a raw upload acknowledgement body.
///
/// # Errors
/// Returns [`ContractError::Decode`] for invalid JSON.
pub fn parse_upload_ack(raw: &str) -> Result<UploadAck, ContractError> {
    serde_json::from_str(raw).map_err(ContractError::Decode)
}

/// Detection parameters attached to upload-and-detect requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Confidence threshold in [0.0, 1.0].
    pub confidence: f32,
    /// IoU threshold in [0.0, 1.0].
    pub iou: f32,
    /// Optional per-class timing weights in seconds, aligned by class index.
    pub per_class_seconds: Option<Vec<u32>>,
}

impl DetectionParams {
    /// Creates validated detection parameters.
    ///
    /// # Errors
    /// Returns [`ContractError::InvalidParameter`] when a threshold is outside
    /// [0.0, 1.0] or not finite.
    pub fn new(confidence: f32, iou: f32) -> Result<Self, ContractError> {
        validate_threshold("confidence", confidence)?;
        validate_threshold("iou", iou)?;
        Ok(Self {
            confidence,
            iou,
            per_class_seconds: None,
        })
    }

    /// Attaches per-class timing weights.
    pub fn with_per_class_seconds(mut self, seconds: Vec<u32>) -> Self {
        self.per_class_seconds = Some(seconds);
        self
    }

    /// Encodes the parameters as multipart form fields.
    ///
    /// Per-class weights travel as a JSON array string under `persec`.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("conf", self.confidence.to_string()),
            ("iou", self.iou.to_string()),
        ];
        if let Some(seconds) = &self.per_class_seconds {
            fields.push(("persec", Value::from(seconds.clone()).to_string()));
        }
        fields
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            iou: 0.5,
            per_class_seconds: None,
        }
    }
}

/// Contract decoding errors.
#[derive(Debug, Error)]
pub enum ContractError {
    /// JSON decode failure.
    #[error("payload decode failure: {0}")]
    Decode(#[from] serde_json::Error),
    /// Body decoded but is not a JSON object.
    #[error("payload is not a JSON object")]
    NotAnObject,
    /// Request parameter outside its legal range.
    #[error("invalid detection parameter: {0}")]
    InvalidParameter(String),
}

fn validate_threshold(name: &str, value: f32) -> Result<(), ContractError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ContractError::InvalidParameter(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn non_negative_integer(value: &Value) -> Option<u64> {
    if let Some(integer) = value.as_u64() {
        return Some(integer);
    }
    // Python backends occasionally emit `30.0`; anything fractional or
    // negative is not a usable integer.
    value
        .as_f64()
        .filter(|float| float.is_finite() && *float >= 0.0 && float.fract() == 0.0)
        .map(|float| float as u64)
}

fn timestamp_seconds(value: &Value) -> Option<u64> {
    if let Some(integer) = value.as_u64() {
        return Some(integer);
    }
    value
        .as_f64()
        .filter(|float| float.is_finite() && *float >= 0.0)
        .map(|float| float.floor() as u64)
}

fn seconds_field(object: &Map<String, Value>, key: &str) -> Option<u32> {
    object
        .get(key)
        .and_then(non_negative_integer)
        .and_then(|seconds| u32::try_from(seconds).ok())
}

fn count_array(value: &Value) -> Option<Vec<u32>> {
    value
        .as_array()?
        .iter()
        .map(|count| non_negative_integer(count).and_then(|count| u32::try_from(count).ok()))
        .collect()
}

fn first_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(Value::as_str)
        .find(|text| !text.trim().is_empty())
        .map(str::to_string)
}

fn error_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn deserialize_error<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(error_text(&value))
}

#[cfg(test)]
mod tests {
    //! Unit tests for lenient payload decoding.

    use super::*;

    #[test]
    fn accepts_short_image_aliases() {
        let result = parse_detection_result(
            r#"{"timestamp":10,"input_image":"data:image/jpeg;base64,AA","processed_image":"/static/outputs/a.jpg"}"#,
        )
        .expect("payload should parse");

        assert_eq!(result.input_image_url.as_deref(), Some("data:image/jpeg;base64,AA"));
        assert_eq!(result.processed_image_url.as_deref(), Some("/static/outputs/a.jpg"));
    }

    #[test]
    fn malformed_counts_decode_as_absent() {
        let result = parse_detection_result(r#"{"counts":[1,"two",3]}"#).expect("should parse");
        assert_eq!(result.counts, None);

        let result = parse_detection_result(r#"{"counts":{"car":1}}"#).expect("should parse");
        assert_eq!(result.counts, None);

        let result = parse_detection_result(r#"{"counts":[1,-2]}"#).expect("should parse");
        assert_eq!(result.counts, None);
    }

    #[test]
    fn timestamps_floor_fractions_and_flag_garbage() {
        let result = parse_detection_result(r#"{"timestamp":150.5}"#).expect("should parse");
        assert_eq!(result.timestamp_field(), TimestampField::Value(150));

        for raw in [r#"{"timestamp":-3}"#, r#"{"timestamp":"150"}"#, r#"{"timestamp":[1]}"#] {
            let result = parse_detection_result(raw).expect("should parse");
            assert_eq!(result.timestamp, None, "{raw}");
            assert_eq!(result.timestamp_field(), TimestampField::Invalid, "{raw}");
        }

        for raw in [r#"{}"#, r#"{"timestamp":null}"#] {
            let result = parse_detection_result(raw).expect("should parse");
            assert_eq!(result.timestamp_field(), TimestampField::Absent, "{raw}");
        }
    }

    #[test]
    fn mistyped_timing_fields_are_absent() {
        let result =
            parse_detection_result(r#"{"red_seconds":"30","yellow_seconds":4.0,"green_seconds":-1}"#)
                .expect("should parse");
        assert_eq!(result.red_seconds, None);
        assert_eq!(result.yellow_seconds, Some(4));
        assert_eq!(result.green_seconds, None);
    }

    #[test]
    fn error_values_are_normalized() {
        let result = parse_detection_result(r#"{"error":null,"timestamp":1}"#).expect("parse");
        assert_eq!(result.failure(), None);

        let result = parse_detection_result(r#"{"error":"Camera unavailable"}"#).expect("parse");
        assert_eq!(result.failure(), Some("Camera unavailable"));

        let result = parse_detection_result(r#"{"error":{"code":7}}"#).expect("parse");
        assert_eq!(result.failure(), Some(r#"{"code":7}"#));
    }

    #[test]
    fn rejects_non_object_bodies() {
        assert!(matches!(
            parse_detection_result("[1,2,3]"),
            Err(ContractError::NotAnObject)
        ));
        assert!(matches!(
            parse_detection_result("not json"),
            Err(ContractError::Decode(_))
        ));
    }

    #[test]
    fn detection_params_validate_thresholds() {
        assert!(DetectionParams::new(0.25, 0.45).is_ok());
        assert!(DetectionParams::new(1.5, 0.45).is_err());
        assert!(DetectionParams::new(0.5, f32::NAN).is_err());
    }

    #[test]
    fn per_class_seconds_travel_as_json_array() {
        let params = DetectionParams::new(0.5, 0.5)
            .expect("valid params")
            .with_per_class_seconds(vec![5, 4, 10, 8, 5, 3]);

        let fields = params.form_fields();
        assert_eq!(fields[0], ("conf", "0.5".to_string()));
        assert_eq!(fields[2], ("persec", "[5,4,10,8,5,3]".to_string()));
    }
}
