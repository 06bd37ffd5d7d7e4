//! Transformation rule models and the transformation result envelope.
//!
//! A rule is a declarative mapping program from a CloudEvent to a payload in
//! one of the supported target formats. Rules are loaded one JSON file per
//! rule (see [`crate::config::rules`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TargetFormat {
    #[serde(rename = "custom-json")]
    CustomJson,
    #[serde(rename = "hl7-v2")]
    Hl7V2,
    #[serde(rename = "fhir-r4")]
    FhirR4,
}

impl TargetFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetFormat::CustomJson => "custom-json",
            TargetFormat::Hl7V2 => "hl7-v2",
            TargetFormat::FhirR4 => "fhir-r4",
        }
    }
}

/// One source → target field mapping.
///
/// `source` is a `$.`-prefixed path against the event document, or a special
/// token inside item mappings (`index`, `constant`). A literal `value` takes
/// precedence over `source`. `transform`/`transforms` name built-in or
/// rule-local functions applied in sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

impl FieldMapping {
    /// The transform chain in application order, whichever of the two
    /// declaration styles the rule used.
    pub fn transform_chain(&self) -> Vec<&str> {
        if !self.transforms.is_empty() {
            self.transforms.iter().map(String::as_str).collect()
        } else {
            self.transform.as_deref().into_iter().collect()
        }
    }
}

/// FHIR extension: emit a `contained` array from a source array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemMappings {
    pub source_array: String,
    pub item_mappings: Vec<FieldMapping>,
}

/// One HL7 field inside a segment, keyed like `MSH-9` or `PID-5`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hl7FieldSpec {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// One HL7 segment specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hl7SegmentSpec {
    pub segment: String,
    /// String expression of the form `$.path op 'literal'` with `op` one of
    /// `==`, `!=`. The segment is skipped when the condition is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub repeatable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_source: Option<String>,
    pub fields: Vec<Hl7FieldSpec>,
}

/// Delimiter metadata for `hl7-delimited` output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hl7Delimiters {
    #[serde(default = "default_field_delim")]
    pub field: char,
    #[serde(default = "default_component_delim")]
    pub component: char,
    #[serde(default = "default_repetition_delim")]
    pub repetition: char,
    #[serde(default = "default_escape_delim")]
    pub escape: char,
    #[serde(default = "default_subcomponent_delim")]
    pub subcomponent: char,
}

fn default_field_delim() -> char {
    '|'
}
fn default_component_delim() -> char {
    '^'
}
fn default_repetition_delim() -> char {
    '~'
}
fn default_escape_delim() -> char {
    '\\'
}
fn default_subcomponent_delim() -> char {
    '&'
}

impl Default for Hl7Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Hl7Delimiters {
    /// MSH-2 encoding characters: component, repetition, escape, subcomponent.
    pub fn encoding_characters(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect()
    }
}

/// A declarative transformation program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRule {
    pub name: String,
    pub event_type: String,
    pub target_format: TargetFormat,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub mappings: Vec<FieldMapping>,
    /// Rule-local functions: an object declares a lookup table, an array
    /// declares a pipeline of transform names.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub transform_functions: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_mappings: Option<ItemMappings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<Hl7SegmentSpec>,
    /// `hl7-delimited` selects pipe-delimited string output for HL7 rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiters: Option<Hl7Delimiters>,
    /// Path to a JSON Schema the transformed payload must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<String>,
}

impl TransformationRule {
    pub fn is_delimited_output(&self) -> bool {
        self.output_type.as_deref() == Some("hl7-delimited")
    }
}

/// A single transformation or validation failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformationError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

impl TransformationError {
    pub fn mapping(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
            constraint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformationMetadata {
    pub event_id: String,
    pub event_type: String,
    pub rule: String,
    pub target_format: String,
    pub transformed_at: String,
    pub validation_performed: bool,
    pub validation_passed: bool,
}

/// Outcome of applying one rule to one event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TransformationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub metadata: TransformationMetadata,
}
