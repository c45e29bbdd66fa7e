//! Validates wire fixtures against frozen JSON schemas and checks that the
//! client decodes every fixture it is expected to understand.

use jsonschema::JSONSchema;
use serde_json::Value;
use signal_sync_contract::{parse_detection_result, parse_upload_ack};

fn contract_path(relative: &str) -> String {
    format!("{}/../../contracts/{relative}", env!("CARGO_MANIFEST_DIR"))
}

fn load_raw(relative: &str) -> String {
    std::fs::read_to_string(contract_path(relative)).expect("contract file should be readable")
}

fn load_json(relative: &str) -> Value {
    serde_json::from_str(&load_raw(relative)).expect("contract file should be valid json")
}

fn compile_validator(relative: &str) -> JSONSchema {
    let schema = load_json(relative);
    JSONSchema::compile(&schema).expect("schema should compile")
}

#[test]
fn detection_result_fixtures_match_schema() {
    let validator = compile_validator("detection-result.schema.json");
    for fixture in [
        "fixtures/detection-result.valid.json",
        "fixtures/last-detection.valid.json",
        "fixtures/detection-error.valid.json",
    ] {
        assert!(
            validator.is_valid(&load_json(fixture)),
            "{fixture} should validate against detection-result schema"
        );
    }
}

#[test]
fn upload_ack_fixture_matches_schema() {
    let validator = compile_validator("upload-ack.schema.json");
    assert!(
        validator.is_valid(&load_json("fixtures/upload-ack.valid.json")),
        "upload ack fixture should validate against schema"
    );
}

#[test]
fn schema_rejects_negative_counts() {
    let validator = compile_validator("detection-result.schema.json");
    let invalid = serde_json::json!({ "timestamp": 1, "counts": [1, -2] });
    assert!(!validator.is_valid(&invalid));
}

#[test]
fn client_decodes_request_cycle_fixture() {
    let result = parse_detection_result(&load_raw("fixtures/detection-result.valid.json"))
        .expect("fixture should decode");

    assert_eq!(result.timestamp, Some(1_740_577_574));
    assert_eq!(result.counts, Some(vec![2, 1, 0, 3, 0, 1]));
    assert_eq!(result.green_seconds, Some(27));
    assert_eq!(result.failure(), None);
}

#[test]
fn client_decodes_shared_resource_aliases() {
    let result = parse_detection_result(&load_raw("fixtures/last-detection.valid.json"))
        .expect("fixture should decode");

    assert_eq!(result.input_image_url.as_deref(), Some("static/last_input.jpg"));
    assert_eq!(
        result.processed_image_url.as_deref(),
        Some("static/last_processed.jpg")
    );
    assert_eq!(result.red_seconds, Some(45));
    assert_eq!(result.total_seconds, None);
}

#[test]
fn client_treats_error_fixture_as_failure() {
    let result = parse_detection_result(&load_raw("fixtures/detection-error.valid.json"))
        .expect("fixture should decode");
    assert_eq!(result.failure(), Some("Camera not available"));
}

#[test]
fn client_encoding_stays_within_schema() {
    let validator = compile_validator("detection-result.schema.json");
    let result = parse_detection_result(&load_raw("fixtures/last-detection.valid.json"))
        .expect("fixture should decode");
    let encoded = serde_json::to_value(&result).expect("result should encode");
    assert!(validator.is_valid(&encoded));

    let ack = parse_upload_ack(&load_raw("fixtures/upload-ack.valid.json"))
        .expect("ack fixture should decode");
    assert!(ack.success);
    assert_eq!(ack.failure(), None);
}
