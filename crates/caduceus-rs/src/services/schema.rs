//! JSON Schema validation of transformed payloads.
//!
//! Rules may name an `outputSchema` file; the compiled validator is cached
//! per path so repeated transformations do not recompile.

use crate::models::error::InteropError;
use crate::models::transform::TransformationError;
use ahash::HashMap as AHashMap;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use std::fs;
use std::sync::{Arc, RwLock};

pub struct SchemaValidator {
    cache: RwLock<AHashMap<String, Arc<JSONSchema>>>,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(AHashMap::default()),
        }
    }

    /// Validates `payload` against the schema at `schema_path`.
    ///
    /// Returns every violation (all-errors mode) as structured entries with
    /// field path, message, observed value, and the violated constraint
    /// keyword. An unreadable or uncompilable schema is a configuration
    /// error, not a validation failure.
    pub fn validate(
        &self,
        schema_path: &str,
        payload: &Value,
    ) -> Result<Vec<TransformationError>, InteropError> {
        let compiled = self.compiled(schema_path)?;

        let issues = match compiled.validate(payload) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|error| {
                    let field = match error.instance_path.to_string() {
                        path if path.is_empty() => "$".to_string(),
                        path => path,
                    };
                    let constraint = error
                        .schema_path
                        .to_string()
                        .rsplit('/')
                        .next()
                        .map(str::to_string);
                    TransformationError {
                        field,
                        message: error.to_string(),
                        value: Some(error.instance.clone().into_owned()),
                        constraint,
                    }
                })
                .collect(),
        };

        Ok(issues)
    }

    fn compiled(&self, schema_path: &str) -> Result<Arc<JSONSchema>, InteropError> {
        if let Some(schema) = self
            .cache
            .read()
            .ok()
            .and_then(|cache| cache.get(schema_path).cloned())
        {
            return Ok(schema);
        }

        let raw = fs::read_to_string(schema_path).map_err(|e| {
            InteropError::Configuration(format!("cannot read schema '{}': {}", schema_path, e))
        })?;
        let document: Value = serde_json::from_str(&raw).map_err(|e| {
            InteropError::Configuration(format!("schema '{}' is not valid JSON: {}", schema_path, e))
        })?;

        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .should_validate_formats(true)
            .compile(&document)
            .map_err(|e| {
                InteropError::Configuration(format!(
                    "schema '{}' failed to compile: {}",
                    schema_path, e
                ))
            })?;

        let compiled = Arc::new(compiled);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(schema_path.to_string(), compiled.clone());
        }
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn schema_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        let schema = json!({
            "type": "object",
            "required": ["patientId"],
            "properties": {
                "patientId": {"type": "string"},
                "age": {"type": "integer", "minimum": 0}
            }
        });
        file.write_all(schema.to_string().as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_valid_payload_has_no_issues() {
        let file = schema_file();
        let validator = SchemaValidator::new();
        let issues = validator
            .validate(
                file.path().to_str().unwrap(),
                &json!({"patientId": "P1", "age": 40}),
            )
            .unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn test_all_errors_reported() {
        let file = schema_file();
        let validator = SchemaValidator::new();
        let issues = validator
            .validate(file.path().to_str().unwrap(), &json!({"age": -1}))
            .unwrap();
        // Missing required field and minimum violation are both reported.
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.constraint.as_deref() == Some("required")));
        assert!(issues.iter().any(|i| i.field == "/age"));
    }

    #[test]
    fn test_missing_schema_is_configuration_error() {
        let validator = SchemaValidator::new();
        let result = validator.validate("/nonexistent/schema.json", &json!({}));
        assert!(matches!(result, Err(InteropError::Configuration(_))));
    }
}
