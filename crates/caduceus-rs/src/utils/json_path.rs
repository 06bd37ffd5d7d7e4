//! Dot-notated field access over JSON values.
//!
//! Transformation mappings and route conditions address event payloads with
//! paths like `$.data.patient.id` or `code.coding[0].system`. This is a
//! deliberate subset of JSONPath: dot notation plus bracketed array indices,
//! nothing else.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    key: Option<String>,
    indices: Vec<usize>,
}

/// Parses `a.b[0].c` into segments. Returns None for malformed paths
/// (unclosed brackets, non-numeric indices).
fn parse_segments(path: &str) -> Option<Vec<Segment>> {
    let trimmed = path.strip_prefix("$.").unwrap_or(path);
    if trimmed.is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    for piece in trimmed.split('.') {
        let mut key = String::new();
        let mut indices = Vec::new();
        let mut chars = piece.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == '[' {
                let mut digits = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    digits.push(inner);
                }
                if !closed {
                    return None;
                }
                indices.push(digits.parse::<usize>().ok()?);
            } else {
                key.push(ch);
            }
        }

        segments.push(Segment {
            key: if key.is_empty() { None } else { Some(key) },
            indices,
        });
    }
    Some(segments)
}

/// Extracts the value at `path`, or None when any intermediate node is
/// missing or of the wrong shape.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_segments(path)?;
    let mut current = root;
    for segment in &segments {
        if let Some(key) = &segment.key {
            current = current.as_object()?.get(key)?;
        }
        for index in &segment.indices {
            current = current.as_array()?.get(*index)?;
        }
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate objects and arrays as
/// needed. Arrays are padded with nulls up to the requested index.
///
/// Returns false when the path is malformed or collides with an existing
/// non-container node.
pub fn set(root: &mut Value, path: &str, value: Value) -> bool {
    let Some(segments) = parse_segments(path) else {
        return false;
    };

    let mut current = root;
    let last = segments.len() - 1;

    for (position, segment) in segments.iter().enumerate() {
        let is_last = position == last;

        if let Some(key) = &segment.key {
            if !current.is_object() {
                if current.is_null() {
                    *current = Value::Object(serde_json::Map::new());
                } else {
                    return false;
                }
            }
            let map = current.as_object_mut().expect("object checked above");
            if is_last && segment.indices.is_empty() {
                map.insert(key.clone(), value);
                return true;
            }
            current = map.entry(key.clone()).or_insert(Value::Null);
        }

        let index_count = segment.indices.len();
        for (bracket, index) in segment.indices.iter().enumerate() {
            if !current.is_array() {
                if current.is_null() {
                    *current = Value::Array(Vec::new());
                } else {
                    return false;
                }
            }
            let array = current.as_array_mut().expect("array checked above");
            while array.len() <= *index {
                array.push(Value::Null);
            }
            if is_last && bracket == index_count - 1 {
                array[*index] = value;
                return true;
            }
            current = &mut array[*index];
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested_field() {
        let doc = json!({"data": {"patient": {"id": "P12345"}}});
        assert_eq!(
            get(&doc, "$.data.patient.id"),
            Some(&json!("P12345"))
        );
    }

    #[test]
    fn test_get_without_dollar_prefix() {
        let doc = json!({"data": {"eventData": {"priority": "urgent"}}});
        assert_eq!(
            get(&doc, "data.eventData.priority"),
            Some(&json!("urgent"))
        );
    }

    #[test]
    fn test_get_array_index() {
        let doc = json!({"results": [{"value": 1}, {"value": 2}]});
        assert_eq!(get(&doc, "results[1].value"), Some(&json!(2)));
        assert_eq!(get(&doc, "results[2].value"), None);
    }

    #[test]
    fn test_get_missing_intermediate() {
        let doc = json!({"data": {}});
        assert_eq!(get(&doc, "$.data.patient.id"), None);
    }

    #[test]
    fn test_get_through_non_object() {
        let doc = json!({"data": "scalar"});
        assert_eq!(get(&doc, "$.data.patient"), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut doc = Value::Null;
        assert!(set(&mut doc, "$.patient.name.family", json!("Doe")));
        assert_eq!(doc, json!({"patient": {"name": {"family": "Doe"}}}));
    }

    #[test]
    fn test_set_array_index_with_padding() {
        let mut doc = Value::Null;
        assert!(set(&mut doc, "code.coding[1].system", json!("http://loinc.org")));
        assert_eq!(
            doc,
            json!({"code": {"coding": [null, {"system": "http://loinc.org"}]}})
        );
    }

    #[test]
    fn test_set_top_level() {
        let mut doc = Value::Null;
        assert!(set(&mut doc, "$.patientId", json!("P1")));
        assert_eq!(doc, json!({"patientId": "P1"}));
    }

    #[test]
    fn test_set_rejects_scalar_collision() {
        let mut doc = json!({"a": 1});
        assert!(!set(&mut doc, "a.b", json!(2)));
    }

    #[test]
    fn test_set_terminal_array_index() {
        let mut doc = Value::Null;
        assert!(set(&mut doc, "tags[0]", json!("first")));
        assert_eq!(doc, json!({"tags": ["first"]}));
    }
}
