//! Rule-driven transformation of CloudEvents into target-format payloads.
//!
//! The engine resolves a [`TransformationRule`], applies its field-mapping
//! program to the event document, and optionally validates the result
//! against the rule's output schema. Transform functions are looked up in a
//! static registry by name, with a secondary rule-local table for per-rule
//! lookup maps and pipelines.

use crate::config::rules::RuleStore;
use crate::models::error::InteropError;
use crate::models::event::CloudEvent;
use crate::models::transform::{
    FieldMapping, TargetFormat, TransformationError, TransformationMetadata,
    TransformationResponse, TransformationRule,
};
use crate::services::hl7;
use crate::services::schema::SchemaValidator;
use crate::utils::json_path;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use serde_json::{json, Value};
use std::sync::Arc;

/// Context for item-level mappings (FHIR `contained` assembly and HL7
/// repeatable segments): sources resolve against the item, `index` yields
/// the position.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    pub item: &'a Value,
    pub index: usize,
}

/// Transformation engine bound to a rule store.
pub struct TransformationEngine {
    store: Arc<RuleStore>,
    validator: SchemaValidator,
}

impl TransformationEngine {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self {
            store,
            validator: SchemaValidator::new(),
        }
    }

    /// Applies a rule to an event.
    ///
    /// When `rule_name` is given the rule must exist and be enabled;
    /// otherwise the first enabled rule whose `eventType` equals the event
    /// type is selected. Mapping and schema errors land in the response;
    /// `continue_on_error` downgrades them to warnings.
    pub async fn transform(
        &self,
        event: &CloudEvent,
        rule_name: Option<&str>,
        continue_on_error: bool,
    ) -> Result<TransformationResponse, InteropError> {
        let rule = match rule_name {
            Some(name) => self.store.rule_by_name(name).await?,
            None => self
                .store
                .rule_for_event_type(&event.event_type)
                .await?
                .ok_or_else(|| InteropError::Transformation {
                    rule: "<unresolved>".to_string(),
                    message: format!("no enabled rule for event type '{}'", event.event_type),
                })?,
        };

        debug!(
            "transforming event {} with rule '{}' ({})",
            event.id,
            rule.name,
            rule.target_format.as_str()
        );
        Ok(self.execute(&rule, event, continue_on_error))
    }

    fn execute(
        &self,
        rule: &TransformationRule,
        event: &CloudEvent,
        continue_on_error: bool,
    ) -> TransformationResponse {
        let doc = serde_json::to_value(event).unwrap_or(Value::Null);

        let (data, mut errors) = match rule.target_format {
            TargetFormat::CustomJson => {
                let (out, errors) = apply_mappings(rule, &rule.mappings, &doc, None);
                (Some(out), errors)
            }
            TargetFormat::FhirR4 => apply_fhir(rule, &doc),
            TargetFormat::Hl7V2 => hl7::build(rule, &doc),
        };

        let mut validation_performed = false;
        let mut validation_passed = true;

        if errors.is_empty() {
            if let (Some(schema_path), Some(payload)) = (&rule.output_schema, &data) {
                // Delimited HL7 output is a string; schema validation only
                // applies to structured payloads.
                if !payload.is_string() {
                    validation_performed = true;
                    let resolved = self.store.resolve_path(schema_path);
                    match self.validator.validate(&resolved, payload) {
                        Ok(issues) => {
                            validation_passed = issues.is_empty();
                            errors.extend(issues);
                        }
                        Err(e) => {
                            validation_passed = false;
                            errors.push(TransformationError::mapping(
                                schema_path.clone(),
                                format!("schema could not be applied: {}", e),
                            ));
                        }
                    }
                }
            }
        }

        let metadata = TransformationMetadata {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            rule: rule.name.clone(),
            target_format: rule.target_format.as_str().to_string(),
            transformed_at: Utc::now().to_rfc3339(),
            validation_performed,
            validation_passed,
        };

        if errors.is_empty() {
            TransformationResponse {
                success: true,
                data,
                errors: Vec::new(),
                warnings: Vec::new(),
                metadata,
            }
        } else if continue_on_error {
            let warnings = errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            TransformationResponse {
                success: true,
                data,
                errors: Vec::new(),
                warnings,
                metadata,
            }
        } else {
            warn!(
                "transformation of event {} with rule '{}' failed ({} errors)",
                event.id,
                rule.name,
                errors.len()
            );
            TransformationResponse {
                success: false,
                data: None,
                errors,
                warnings: Vec::new(),
                metadata,
            }
        }
    }
}

/// Applies a mapping list to the event document (or to an item context),
/// producing the output object and any mapping errors.
pub fn apply_mappings(
    rule: &TransformationRule,
    mappings: &[FieldMapping],
    doc: &Value,
    ctx: Option<ItemContext<'_>>,
) -> (Value, Vec<TransformationError>) {
    let mut out = Value::Null;
    let mut errors = Vec::new();

    for mapping in mappings {
        let mut resolved = resolve_source(mapping.source.as_deref(), mapping.value.as_ref(), doc, ctx);

        if let Some(value) = resolved.take() {
            match apply_transform_chain(value, &mapping.transform_chain(), rule) {
                Ok(value) => resolved = Some(value),
                Err(message) => {
                    errors.push(TransformationError::mapping(mapping.target.clone(), message));
                    continue;
                }
            }
        }

        if is_absent(&resolved) {
            if let Some(default) = &mapping.default_value {
                resolved = Some(default.clone());
            }
        }

        match resolved {
            Some(value) if !value.is_null() => {
                if !json_path::set(&mut out, &mapping.target, value) {
                    errors.push(TransformationError::mapping(
                        mapping.target.clone(),
                        "target path could not be written",
                    ));
                }
            }
            _ if mapping.required => {
                errors.push(TransformationError::mapping(
                    mapping.target.clone(),
                    "required field missing and no default provided",
                ));
            }
            _ => {}
        }
    }

    // A rule whose mappings all came up empty still emits an object.
    if out.is_null() {
        out = Value::Object(serde_json::Map::new());
    }
    (out, errors)
}

fn apply_fhir(
    rule: &TransformationRule,
    doc: &Value,
) -> (Option<Value>, Vec<TransformationError>) {
    let (mut out, mut errors) = apply_mappings(rule, &rule.mappings, doc, None);

    if let Some(spec) = &rule.item_mappings {
        match json_path::get(doc, &spec.source_array).and_then(Value::as_array) {
            Some(items) => {
                let mut contained = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let ctx = ItemContext { item, index };
                    let (entry, item_errors) =
                        apply_mappings(rule, &spec.item_mappings, doc, Some(ctx));
                    for mut error in item_errors {
                        error.field = format!("contained[{}].{}", index, error.field);
                        errors.push(error);
                    }
                    contained.push(entry);
                }
                if let Some(resource) = out.as_object_mut() {
                    resource.insert("contained".to_string(), Value::Array(contained));
                }
            }
            None => {
                errors.push(TransformationError::mapping(
                    spec.source_array.clone(),
                    "item mapping source is missing or not an array",
                ));
            }
        }
    }

    (Some(out), errors)
}

/// Resolves a mapping source to a value.
///
/// Precedence: literal `value`, then the `index`/`constant` tokens (item
/// context only), then `$.`-prefixed path extraction. Anything else is
/// undefined.
pub fn resolve_source(
    source: Option<&str>,
    literal: Option<&Value>,
    doc: &Value,
    ctx: Option<ItemContext<'_>>,
) -> Option<Value> {
    if let Some(value) = literal {
        return Some(value.clone());
    }
    let source = source?;

    if let Some(ctx) = ctx {
        match source {
            "index" => return Some(json!(ctx.index)),
            "constant" => return None,
            path if path.starts_with("$.") => {
                return json_path::get(ctx.item, path).cloned();
            }
            _ => return None,
        }
    }

    if source.starts_with("$.") {
        json_path::get(doc, source).cloned()
    } else {
        None
    }
}

fn is_absent(value: &Option<Value>) -> bool {
    match value {
        None => true,
        Some(Value::Null) => true,
        Some(_) => false,
    }
}

/// Applies a transform chain in order. Unknown names pass the value
/// through; a failing transform (e.g. `toNumber` on non-numeric input)
/// fails the whole mapping.
pub fn apply_transform_chain(
    value: Value,
    chain: &[&str],
    rule: &TransformationRule,
) -> Result<Value, String> {
    let mut current = value;
    for name in chain {
        current = apply_transform(current, name, rule)?;
    }
    Ok(current)
}

fn apply_transform(value: Value, name: &str, rule: &TransformationRule) -> Result<Value, String> {
    // Rule-local functions shadow the built-in registry.
    if let Some(local) = rule.transform_functions.get(name) {
        return match local {
            Value::Object(table) => {
                let key = value_to_string(&value);
                Ok(table.get(&key).cloned().unwrap_or(value))
            }
            Value::Array(pipeline) => {
                let mut current = value;
                for step in pipeline {
                    let Some(step_name) = step.as_str() else {
                        return Err(format!(
                            "pipeline '{}' contains a non-string step",
                            name
                        ));
                    };
                    current = apply_transform(current, step_name, rule)?;
                }
                Ok(current)
            }
            _ => Ok(value),
        };
    }

    let (base, arg) = match name.split_once(':') {
        Some((base, arg)) => (base, Some(arg)),
        None => (name, None),
    };
    builtin_transform(base, arg, value)
}

fn builtin_transform(name: &str, arg: Option<&str>, value: Value) -> Result<Value, String> {
    match name {
        "trim" => Ok(match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        }),
        "toLowerCase" => Ok(match value {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other,
        }),
        "toUpperCase" => Ok(match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        }),
        "toTitleCase" => Ok(match value {
            Value::String(s) => Value::String(title_case(&s)),
            other => other,
        }),
        "toNumber" => to_number(value),
        "formatDateISO8601" => Ok(format_date_iso8601(value)),
        "formatDateHL7" => Ok(format_date_hl7(value)),
        "addPrefix" => Ok(Value::String(format!(
            "{}{}",
            arg.unwrap_or_default(),
            value_to_string(&value)
        ))),
        "addSuffix" => Ok(Value::String(format!(
            "{}{}",
            value_to_string(&value),
            arg.unwrap_or_default()
        ))),
        "incrementIndex" => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(json!(i + 1))
                } else if let Some(f) = n.as_f64() {
                    Ok(json!(f + 1.0))
                } else {
                    Err("incrementIndex applied to unrepresentable number".to_string())
                }
            }
            other => Err(format!(
                "incrementIndex applied to non-numeric value '{}'",
                value_to_string(&other)
            )),
        },
        "escapeHL7" => Ok(match value {
            Value::String(s) => Value::String(hl7::escape_text(&s)),
            other => other,
        }),
        // Unknown transform names pass the value through untouched.
        _ => Ok(value),
    }
}

fn to_number(value: Value) -> Result<Value, String> {
    match value {
        Value::Number(_) => Ok(value),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Ok(json!(i))
            } else if let Ok(f) = trimmed.parse::<f64>() {
                Ok(json!(f))
            } else {
                Err(format!("'{}' cannot be coerced to a number", s))
            }
        }
        other => Err(format!(
            "'{}' cannot be coerced to a number",
            value_to_string(&other)
        )),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_whitespace() {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S") {
        return Some(naive.and_utc());
    }
    None
}

fn format_date_iso8601(value: Value) -> Value {
    match &value {
        Value::String(s) => match parse_timestamp(s) {
            Some(dt) => Value::String(dt.to_rfc3339()),
            None => value,
        },
        _ => value,
    }
}

fn format_date_hl7(value: Value) -> Value {
    match &value {
        Value::String(s) => match parse_timestamp(s) {
            Some(dt) => Value::String(dt.format("%Y%m%d%H%M%S").to_string()),
            None => value,
        },
        _ => value,
    }
}

/// String rendition of a value for transforms that concatenate or key a
/// lookup table.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_rule() -> TransformationRule {
        TransformationRule {
            name: "test".to_string(),
            event_type: "health.patient.registered".to_string(),
            target_format: TargetFormat::CustomJson,
            enabled: true,
            description: None,
            mappings: Vec::new(),
            transform_functions: Default::default(),
            item_mappings: None,
            segments: Vec::new(),
            output_type: None,
            delimiters: None,
            output_schema: None,
        }
    }

    #[test]
    fn test_to_number_failure() {
        assert!(to_number(json!("abc")).is_err());
        assert_eq!(to_number(json!("42")).unwrap(), json!(42));
        assert_eq!(to_number(json!("1.5")).unwrap(), json!(1.5));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("john MICHAEL doe"), "John Michael Doe");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_unknown_transform_passes_through() {
        let rule = bare_rule();
        let out = apply_transform_chain(json!("x"), &["definitelyNotATransform"], &rule).unwrap();
        assert_eq!(out, json!("x"));
    }

    #[test]
    fn test_prefix_and_suffix() {
        let rule = bare_rule();
        let out = apply_transform_chain(json!(42), &["addPrefix:OBS-"], &rule).unwrap();
        assert_eq!(out, json!("OBS-42"));
        let out = apply_transform_chain(json!("lab"), &["addSuffix:-result"], &rule).unwrap();
        assert_eq!(out, json!("lab-result"));
    }

    #[test]
    fn test_hl7_date_format() {
        let out = format_date_hl7(json!("2024-03-01T10:30:05Z"));
        assert_eq!(out, json!("20240301103005"));
    }

    #[test]
    fn test_lookup_table_transform() {
        let mut rule = bare_rule();
        rule.transform_functions
            .insert("mapGender".to_string(), json!({"m": "male", "f": "female"}));

        let out = apply_transform_chain(json!("m"), &["mapGender"], &rule).unwrap();
        assert_eq!(out, json!("male"));

        // Unmapped keys pass through.
        let out = apply_transform_chain(json!("x"), &["mapGender"], &rule).unwrap();
        assert_eq!(out, json!("x"));
    }

    #[test]
    fn test_pipeline_transform() {
        let mut rule = bare_rule();
        rule.transform_functions
            .insert("normalize".to_string(), json!(["trim", "toUpperCase"]));

        let out = apply_transform_chain(json!("  stat  "), &["normalize"], &rule).unwrap();
        assert_eq!(out, json!("STAT"));
    }
}
