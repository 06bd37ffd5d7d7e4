//! Routing configuration loading and validation.
//!
//! The routing rule set is parsed from YAML and validated before use:
//! structural requirements are hard errors, while style and operability
//! concerns surface as warnings and recommendations.

use crate::config::settings::read_config_file;
use crate::models::error::InteropError;
use crate::models::route::{DestinationType, FallbackBehavior, RoutingConfig};
use log::{info, warn};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads and parses the routing YAML. Missing top-level sections are
/// rejected here so validation can report on fully-typed config.
pub fn load_routing_config(path: &str) -> Result<RoutingConfig, InteropError> {
    let raw = read_config_file(path)?;

    let document: serde_yaml::Value = serde_yaml::from_str(&raw)
        .map_err(|e| InteropError::Configuration(format!("routing config is not YAML: {}", e)))?;
    for section in ["metadata", "settings", "routes"] {
        if document.get(section).is_none() {
            return Err(InteropError::Configuration(format!(
                "routing config is missing the '{}' section",
                section
            )));
        }
    }
    if !document
        .get("routes")
        .map(serde_yaml::Value::is_sequence)
        .unwrap_or(false)
    {
        return Err(InteropError::Configuration(
            "routing config 'routes' must be a list".to_string(),
        ));
    }

    serde_yaml::from_value(document)
        .map_err(|e| InteropError::Configuration(format!("routing config is invalid: {}", e)))
}

/// Routing configuration validator.
pub struct RoutingValidator;

impl RoutingValidator {
    pub fn validate(config: &RoutingConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_metadata(config, &mut result);
        Self::validate_settings(config, &mut result);
        Self::validate_routes(config, &mut result);
        Self::validate_fallback(config, &mut result);
        Self::log_results(&result);

        result
    }

    fn validate_settings(config: &RoutingConfig, result: &mut ValidationResult) {
        if config.settings.fallback_behavior == FallbackBehavior::Fallback
            && config.settings.fallback_queue.is_empty()
        {
            result.add_error(
                "settings.fallbackQueue is required when fallbackBehavior is 'fallback'"
                    .to_string(),
            );
        }
    }

    fn validate_metadata(config: &RoutingConfig, result: &mut ValidationResult) {
        if config.metadata.version.is_empty() {
            result.add_error("metadata.version is required".to_string());
        }
        if config.metadata.last_updated.is_empty() {
            result.add_error("metadata.lastUpdated is required".to_string());
        }
        if config.metadata.description.is_empty() {
            result.add_error("metadata.description is required".to_string());
        }
    }

    fn validate_routes(config: &RoutingConfig, result: &mut ValidationResult) {
        if config.routes.is_empty() {
            result.add_error("at least one route must be configured".to_string());
            return;
        }
        if !config.routes.iter().any(|r| r.enabled) {
            result.add_error("at least one route must be enabled".to_string());
        }

        let mut seen_names = HashSet::new();
        for route in &config.routes {
            if !seen_names.insert(route.name.as_str()) {
                result.add_error(format!("duplicate route name '{}'", route.name));
            }

            if route.priority > 10 {
                result.add_error(format!(
                    "route '{}' priority {} outside [0,10]",
                    route.name, route.priority
                ));
            }

            match route.destination.destination_type {
                DestinationType::Http => {
                    if route.destination.endpoint.as_deref().unwrap_or("").is_empty() {
                        result.add_error(format!(
                            "route '{}' has an http destination without an endpoint",
                            route.name
                        ));
                    }
                }
                DestinationType::Queue | DestinationType::Topic => {
                    if route.destination.queue.as_deref().unwrap_or("").is_empty() {
                        result.add_error(format!(
                            "route '{}' has a queue destination without a queue",
                            route.name
                        ));
                    }
                }
                DestinationType::Gateway => {}
            }

            if route.source.contains('#') || route.event_type.contains('#') {
                result.add_warning(format!(
                    "route '{}' uses '#', which matches literally; use '*' for wildcards",
                    route.name
                ));
            }

            if !route.enabled {
                result.add_warning(format!("route '{}' is disabled", route.name));
            }
        }
    }

    fn validate_fallback(config: &RoutingConfig, result: &mut ValidationResult) {
        let has_fallback = config.routes.iter().any(|route| {
            route.enabled && route.priority == 0 && route.source == "*" && route.event_type == "*"
        });
        if !has_fallback {
            result.add_recommendation(
                "no fallback route (priority 0, source '*', type '*'); unmatched events depend on fallbackBehavior"
                    .to_string(),
            );
        }
    }

    fn log_results(result: &ValidationResult) {
        if result.is_valid {
            info!("routing configuration validation passed");
        } else {
            for error in &result.errors {
                log::error!("routing validation error: {}", error);
            }
        }
        for warning in &result.warnings {
            warn!("routing validation warning: {}", warning);
        }
        for recommendation in &result.recommendations {
            info!("routing recommendation: {}", recommendation);
        }
    }
}
