//! HL7 v2 message construction from segment specifications.
//!
//! Rules targeting `hl7-v2` declare a list of segments, each with fields
//! keyed like `MSH-9` or `PID-5`. Construction proceeds segment by segment;
//! with `outputType: hl7-delimited` the result is serialized into a
//! pipe-delimited string using the rule's delimiter metadata, otherwise a
//! structured JSON form is returned.

use crate::models::transform::{
    Hl7Delimiters, Hl7FieldSpec, Hl7SegmentSpec, TransformationError, TransformationRule,
};
use crate::services::transformer::{
    apply_transform_chain, resolve_source, value_to_string, ItemContext,
};
use crate::utils::json_path;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Segment separator in delimited output.
const SEGMENT_SEPARATOR: &str = "\r";

/// Builds an HL7 message for the rule.
///
/// Returns the payload (a JSON segment list, or a delimited string when the
/// rule requests it) plus any field-level errors.
pub fn build(
    rule: &TransformationRule,
    doc: &Value,
) -> (Option<Value>, Vec<TransformationError>) {
    let mut segments: Vec<(String, BTreeMap<u32, Value>)> = Vec::new();
    let mut errors = Vec::new();

    for spec in &rule.segments {
        if let Some(condition) = &spec.condition {
            match evaluate_segment_condition(condition, doc) {
                Some(true) => {}
                Some(false) => continue,
                None => {
                    errors.push(TransformationError::mapping(
                        spec.segment.clone(),
                        format!("unparseable segment condition '{}'", condition),
                    ));
                    continue;
                }
            }
        }

        if spec.repeatable {
            let Some(source) = &spec.item_source else {
                errors.push(TransformationError::mapping(
                    spec.segment.clone(),
                    "repeatable segment without itemSource",
                ));
                continue;
            };
            let Some(items) = json_path::get(doc, source).and_then(Value::as_array) else {
                // Nothing to repeat over; emit no segments.
                continue;
            };
            for (index, item) in items.iter().enumerate() {
                let ctx = ItemContext { item, index };
                let fields = build_fields(rule, spec, doc, Some(ctx), &mut errors);
                segments.push((spec.segment.clone(), fields));
            }
        } else {
            let fields = build_fields(rule, spec, doc, None, &mut errors);
            segments.push((spec.segment.clone(), fields));
        }
    }

    let payload = if rule.is_delimited_output() {
        let delimiters = rule.delimiters.clone().unwrap_or_default();
        Value::String(serialize_delimited(&segments, &delimiters))
    } else {
        Value::Array(
            segments
                .into_iter()
                .map(|(name, fields)| {
                    let field_map: serde_json::Map<String, Value> = fields
                        .into_iter()
                        .map(|(position, value)| (format!("{}-{}", name, position), value))
                        .collect();
                    json!({"segment": name, "fields": field_map})
                })
                .collect(),
        )
    };

    (Some(payload), errors)
}

fn build_fields(
    rule: &TransformationRule,
    spec: &Hl7SegmentSpec,
    doc: &Value,
    ctx: Option<ItemContext<'_>>,
    errors: &mut Vec<TransformationError>,
) -> BTreeMap<u32, Value> {
    let mut fields = BTreeMap::new();

    for field in &spec.fields {
        let Some(position) = parse_field_position(&field.field, &spec.segment) else {
            errors.push(TransformationError::mapping(
                field.field.clone(),
                format!("field key does not belong to segment '{}'", spec.segment),
            ));
            continue;
        };

        let mut resolved = resolve_source(field.source.as_deref(), field.value.as_ref(), doc, ctx);

        if let Some(value) = resolved.take() {
            match apply_transform_chain(value, &field_transform_chain(field), rule) {
                Ok(value) => resolved = Some(value),
                Err(message) => {
                    errors.push(TransformationError::mapping(field.field.clone(), message));
                    continue;
                }
            }
        }

        if resolved.as_ref().map(Value::is_null).unwrap_or(true) {
            resolved = field.default_value.clone();
        }

        if let Some(value) = resolved {
            fields.insert(position, value);
        }
    }

    fields
}

fn field_transform_chain(field: &Hl7FieldSpec) -> Vec<&str> {
    if !field.transforms.is_empty() {
        field.transforms.iter().map(String::as_str).collect()
    } else {
        field.transform.as_deref().into_iter().collect()
    }
}

/// Parses `MSH-9` into position 9, checking the segment prefix.
fn parse_field_position(key: &str, segment: &str) -> Option<u32> {
    let (prefix, position) = key.rsplit_once('-')?;
    if prefix != segment {
        return None;
    }
    position.parse().ok()
}

/// Evaluates a `$.path op 'literal'` expression. Supported operators:
/// `==`, `!=`. Returns None when the expression cannot be parsed.
fn evaluate_segment_condition(expression: &str, doc: &Value) -> Option<bool> {
    let (path, operator, literal) = if let Some((path, rest)) = expression.split_once("==") {
        (path, "==", rest)
    } else if let Some((path, rest)) = expression.split_once("!=") {
        (path, "!=", rest)
    } else {
        return None;
    };

    let path = path.trim();
    let literal = literal.trim().trim_matches('\'');

    let actual = json_path::get(doc, path)
        .map(value_to_string)
        .unwrap_or_default();

    match operator {
        "==" => Some(actual == literal),
        "!=" => Some(actual != literal),
        _ => None,
    }
}

/// Serializes segments into pipe-delimited HL7.
///
/// MSH-1 and MSH-2 are positional: the field delimiter itself and the
/// encoding characters. Gaps in field numbering are filled with empty
/// fields.
fn serialize_delimited(
    segments: &[(String, BTreeMap<u32, Value>)],
    delimiters: &Hl7Delimiters,
) -> String {
    let mut lines = Vec::with_capacity(segments.len());

    for (name, fields) in segments {
        let is_msh = name == "MSH";
        let max_position = fields.keys().max().copied().unwrap_or(0);
        let first_position: u32 = if is_msh { 3 } else { 1 };

        let mut rendered = String::new();
        rendered.push_str(name);

        if is_msh {
            // MSH-1 is the field delimiter, MSH-2 the encoding characters.
            rendered.push(delimiters.field);
            rendered.push_str(&field_text(
                fields.get(&2),
                &delimiters.encoding_characters(),
                delimiters,
            ));
        }

        for position in first_position..=max_position.max(first_position - 1) {
            rendered.push(delimiters.field);
            rendered.push_str(&field_text(fields.get(&position), "", delimiters));
        }

        lines.push(rendered);
    }

    lines.join(SEGMENT_SEPARATOR)
}

fn field_text(value: Option<&Value>, fallback: &str, delimiters: &Hl7Delimiters) -> String {
    match value {
        None | Some(Value::Null) => fallback.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(&delimiters.repetition.to_string()),
        Some(other) => value_to_string(other),
    }
}

/// Escapes HL7 delimiter characters in free text using the standard escape
/// sequences.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\E\\"),
            '|' => out.push_str("\\F\\"),
            '^' => out.push_str("\\S\\"),
            '&' => out.push_str("\\T\\"),
            '~' => out.push_str("\\R\\"),
            _ => out.push(ch),
        }
    }
    out
}
