use caduceus_rs::config::rules::{RuleStore, DEFAULT_RULE_TTL};
use caduceus_rs::models::event::CloudEvent;
use caduceus_rs::services::fanout::content_type_for;
use caduceus_rs::services::transformer::TransformationEngine;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write_json(dir: &Path, file: &str, value: Value) {
    fs::write(dir.join(file), serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

fn patient_event() -> CloudEvent {
    CloudEvent::from_json(json!({
        "specversion": "1.0",
        "type": "health.patient.registered",
        "source": "smile.health-service",
        "id": "e1",
        "data": {
            "patient": {
                "id": "P12345",
                "firstName": "John",
                "lastName": "Doe",
                "gender": "m"
            }
        }
    }))
    .unwrap()
}

fn patient_rule() -> Value {
    json!({
        "name": "patient-to-custom",
        "eventType": "health.patient.registered",
        "targetFormat": "custom-json",
        "enabled": true,
        "mappings": [
            {"source": "$.data.patient.id", "target": "$.patientId", "required": true},
            {"source": "$.data.patient.firstName", "target": "$.given"},
            {"source": "$.data.patient.lastName", "target": "$.family"},
            {"source": "$.data.patient.gender", "target": "$.gender", "transform": "mapGender"}
        ],
        "transformFunctions": {
            "mapGender": {"m": "male", "f": "female", "o": "other"}
        }
    })
}

async fn engine_with_rules(dir: &TempDir) -> TransformationEngine {
    let store = Arc::new(RuleStore::new(dir.path(), DEFAULT_RULE_TTL));
    store.reload().await.unwrap();
    TransformationEngine::new(store)
}

#[tokio::test]
async fn test_patient_registration_to_custom_json() {
    let dir = TempDir::new().unwrap();
    write_json(dir.path(), "patient.json", patient_rule());
    let engine = engine_with_rules(&dir).await;

    let response = engine
        .transform(&patient_event(), Some("patient-to-custom"), false)
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(
        response.data.unwrap(),
        json!({
            "patientId": "P12345",
            "given": "John",
            "family": "Doe",
            "gender": "male"
        })
    );
    assert_eq!(response.metadata.rule, "patient-to-custom");
    assert_eq!(response.metadata.target_format, "custom-json");
    assert!(!response.metadata.validation_performed);
}

#[tokio::test]
async fn test_rule_selected_by_event_type() {
    let dir = TempDir::new().unwrap();
    write_json(dir.path(), "patient.json", patient_rule());
    let engine = engine_with_rules(&dir).await;

    let response = engine.transform(&patient_event(), None, false).await.unwrap();
    assert!(response.success);
    assert_eq!(response.metadata.rule, "patient-to-custom");
}

#[tokio::test]
async fn test_transformation_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_json(dir.path(), "patient.json", patient_rule());
    let engine = engine_with_rules(&dir).await;

    let event = patient_event();
    let first = engine.transform(&event, None, false).await.unwrap();
    let second = engine.transform(&event, None, false).await.unwrap();
    assert_eq!(first.data, second.data);
}

#[tokio::test]
async fn test_required_field_missing_fails_with_target_path() {
    let dir = TempDir::new().unwrap();
    let mut rule = patient_rule();
    rule["mappings"][0]["source"] = json!("$.data.patient.mrn");
    write_json(dir.path(), "patient.json", rule);
    let engine = engine_with_rules(&dir).await;

    let response = engine.transform(&patient_event(), None, false).await.unwrap();
    assert!(!response.success);
    assert!(response.data.is_none());
    assert!(response
        .errors
        .iter()
        .any(|e| e.field == "$.patientId" && e.message.contains("required")));
}

#[tokio::test]
async fn test_continue_on_error_downgrades_to_warnings() {
    let dir = TempDir::new().unwrap();
    let mut rule = patient_rule();
    rule["mappings"][0]["source"] = json!("$.data.patient.mrn");
    write_json(dir.path(), "patient.json", rule);
    let engine = engine_with_rules(&dir).await;

    let response = engine.transform(&patient_event(), None, true).await.unwrap();
    assert!(response.success);
    assert!(response.errors.is_empty());
    assert!(!response.warnings.is_empty());
}

#[tokio::test]
async fn test_default_value_applies_when_source_missing() {
    let dir = TempDir::new().unwrap();
    let rule = json!({
        "name": "with-default",
        "eventType": "health.patient.registered",
        "targetFormat": "custom-json",
        "enabled": true,
        "mappings": [
            {"source": "$.data.patient.language", "target": "$.language",
             "defaultValue": "en", "required": true}
        ]
    });
    write_json(dir.path(), "rule.json", rule);
    let engine = engine_with_rules(&dir).await;

    let response = engine.transform(&patient_event(), None, false).await.unwrap();
    assert!(response.success);
    assert_eq!(response.data.unwrap(), json!({"language": "en"}));
}

#[tokio::test]
async fn test_to_number_on_non_numeric_fails_mapping() {
    let dir = TempDir::new().unwrap();
    let rule = json!({
        "name": "numeric",
        "eventType": "health.patient.registered",
        "targetFormat": "custom-json",
        "enabled": true,
        "mappings": [
            {"source": "$.data.patient.lastName", "target": "$.age", "transform": "toNumber"}
        ]
    });
    write_json(dir.path(), "rule.json", rule);
    let engine = engine_with_rules(&dir).await;

    let response = engine.transform(&patient_event(), None, false).await.unwrap();
    assert!(!response.success);
    assert!(response.errors.iter().any(|e| e.field == "$.age"));
}

#[tokio::test]
async fn test_nested_target_with_array_index() {
    let dir = TempDir::new().unwrap();
    let rule = json!({
        "name": "nested",
        "eventType": "health.patient.registered",
        "targetFormat": "custom-json",
        "enabled": true,
        "mappings": [
            {"value": "http://hl7.org/fhir/sid/us-mrn", "target": "code.coding[0].system"},
            {"source": "$.data.patient.id", "target": "code.coding[0].value"}
        ]
    });
    write_json(dir.path(), "rule.json", rule);
    let engine = engine_with_rules(&dir).await;

    let response = engine.transform(&patient_event(), None, false).await.unwrap();
    assert_eq!(
        response.data.unwrap(),
        json!({
            "code": {
                "coding": [
                    {"system": "http://hl7.org/fhir/sid/us-mrn", "value": "P12345"}
                ]
            }
        })
    );
}

#[tokio::test]
async fn test_fhir_item_mappings_build_contained_array() {
    let dir = TempDir::new().unwrap();
    let rule = json!({
        "name": "vitals-to-fhir",
        "eventType": "health.vitals.recorded",
        "targetFormat": "fhir-r4",
        "enabled": true,
        "mappings": [
            {"value": "Observation", "target": "$.resourceType"},
            {"source": "$.data.patientId", "target": "$.subject.reference", "transform": "addPrefix:Patient/"}
        ],
        "itemMappings": {
            "sourceArray": "$.data.readings",
            "itemMappings": [
                {"source": "index", "target": "$.sequence", "transform": "incrementIndex"},
                {"source": "$.type", "target": "$.code.text"},
                {"source": "$.value", "target": "$.valueQuantity.value", "transform": "toNumber"}
            ]
        }
    });
    write_json(dir.path(), "rule.json", rule);
    let engine = engine_with_rules(&dir).await;

    let event = CloudEvent::from_json(json!({
        "specversion": "1.0",
        "type": "health.vitals.recorded",
        "source": "smile.health-service",
        "id": "e5",
        "data": {
            "patientId": "P9",
            "readings": [
                {"type": "heart-rate", "value": "72"},
                {"type": "spo2", "value": "98"}
            ]
        }
    }))
    .unwrap();

    let response = engine.transform(&event, None, false).await.unwrap();
    assert!(response.success, "errors: {:?}", response.errors);
    let data = response.data.unwrap();
    assert_eq!(data["resourceType"], json!("Observation"));
    assert_eq!(data["subject"]["reference"], json!("Patient/P9"));
    assert_eq!(
        data["contained"],
        json!([
            {"sequence": 1, "code": {"text": "heart-rate"}, "valueQuantity": {"value": 72}},
            {"sequence": 2, "code": {"text": "spo2"}, "valueQuantity": {"value": 98}}
        ])
    );
}

#[tokio::test]
async fn test_hl7_delimited_output() {
    let dir = TempDir::new().unwrap();
    let rule = json!({
        "name": "lab-to-hl7",
        "eventType": "health.lab.result-available",
        "targetFormat": "hl7-v2",
        "enabled": true,
        "outputType": "hl7-delimited",
        "segments": [
            {
                "segment": "MSH",
                "fields": [
                    {"field": "MSH-9", "value": "ORU^R01"},
                    {"field": "MSH-10", "source": "$.id"}
                ]
            },
            {
                "segment": "PID",
                "fields": [
                    {"field": "PID-3", "source": "$.data.patientId"},
                    {"field": "PID-5", "source": "$.data.patientName", "transform": "escapeHL7"}
                ]
            },
            {
                "segment": "OBX",
                "repeatable": true,
                "itemSource": "$.data.results",
                "fields": [
                    {"field": "OBX-1", "source": "index", "transform": "incrementIndex"},
                    {"field": "OBX-3", "source": "$.test"},
                    {"field": "OBX-5", "source": "$.value"}
                ]
            }
        ]
    });
    write_json(dir.path(), "rule.json", rule);
    let engine = engine_with_rules(&dir).await;

    let event = CloudEvent::from_json(json!({
        "specversion": "1.0",
        "type": "health.lab.result-available",
        "source": "smile.health-service",
        "id": "lab-1",
        "data": {
            "patientId": "P12345",
            "patientName": "Doe^John",
            "results": [
                {"test": "WBC", "value": "6.1"},
                {"test": "HGB", "value": "13.9"}
            ]
        }
    }))
    .unwrap();

    let response = engine.transform(&event, None, false).await.unwrap();
    assert!(response.success, "errors: {:?}", response.errors);

    let payload = response.data.unwrap();
    let message = payload.as_str().expect("delimited output is a string");
    let segments: Vec<&str> = message.split('\r').collect();

    assert_eq!(segments.len(), 4);
    assert_eq!(segments[0], "MSH|^~\\&|||||||ORU^R01|lab-1");
    assert_eq!(segments[1], "PID|||P12345||Doe\\S\\John");
    assert_eq!(segments[2], "OBX|1||WBC||6.1");
    assert_eq!(segments[3], "OBX|2||HGB||13.9");

    // Delimited HL7 travels as text/plain in fan-out.
    assert_eq!(content_type_for(&payload), "text/plain");
}

#[tokio::test]
async fn test_hl7_segment_condition_skips_segment() {
    let dir = TempDir::new().unwrap();
    let rule = json!({
        "name": "conditional-hl7",
        "eventType": "health.lab.result-available",
        "targetFormat": "hl7-v2",
        "enabled": true,
        "outputType": "hl7-delimited",
        "segments": [
            {"segment": "MSH", "fields": [{"field": "MSH-9", "value": "ORU^R01"}]},
            {
                "segment": "NTE",
                "condition": "$.data.hasNotes == 'true'",
                "fields": [{"field": "NTE-3", "source": "$.data.notes"}]
            }
        ]
    });
    write_json(dir.path(), "rule.json", rule);
    let engine = engine_with_rules(&dir).await;

    let event = CloudEvent::from_json(json!({
        "specversion": "1.0",
        "type": "health.lab.result-available",
        "source": "smile.health-service",
        "id": "lab-2",
        "data": {"hasNotes": "false", "notes": "n/a"}
    }))
    .unwrap();

    let response = engine.transform(&event, None, false).await.unwrap();
    let message = response.data.unwrap();
    assert!(!message.as_str().unwrap().contains("NTE"));
}

#[tokio::test]
async fn test_output_schema_validation() {
    let dir = TempDir::new().unwrap();
    let schemas = dir.path().join("schemas");
    fs::create_dir(&schemas).unwrap();
    write_json(
        &schemas,
        "patient.json",
        json!({
            "type": "object",
            "required": ["patientId", "given", "family", "gender"],
            "properties": {
                "patientId": {"type": "string"},
                "gender": {"enum": ["male", "female", "other", "unknown"]}
            }
        }),
    );

    let mut rule = patient_rule();
    rule["outputSchema"] = json!("schemas/patient.json");
    write_json(dir.path(), "patient.json", rule);
    let engine = engine_with_rules(&dir).await;

    let response = engine.transform(&patient_event(), None, false).await.unwrap();
    assert!(response.success, "errors: {:?}", response.errors);
    assert!(response.metadata.validation_performed);
    assert!(response.metadata.validation_passed);

    // An event with an unmappable gender value fails the enum constraint.
    let mut bad = patient_event();
    bad.data.as_mut().unwrap()["patient"]["gender"] = json!("q");
    let response = engine.transform(&bad, None, false).await.unwrap();
    assert!(!response.success);
    assert!(response.metadata.validation_performed);
    assert!(!response.metadata.validation_passed);
    assert!(response
        .errors
        .iter()
        .any(|e| e.constraint.as_deref() == Some("enum")));
}

#[tokio::test]
async fn test_unknown_rule_name_is_an_error() {
    let dir = TempDir::new().unwrap();
    write_json(dir.path(), "patient.json", patient_rule());
    let engine = engine_with_rules(&dir).await;

    let result = engine
        .transform(&patient_event(), Some("does-not-exist"), false)
        .await;
    assert!(result.is_err());
}
