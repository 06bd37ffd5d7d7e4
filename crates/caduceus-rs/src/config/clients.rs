//! Clients configuration loading and validation.

use crate::config::routing::ValidationResult;
use crate::config::settings::read_config_file;
use crate::models::client::{AuthType, ClientsFile};
use crate::models::error::InteropError;
use crate::services::circuit_breaker::CircuitBreakerSettings;
use log::{info, warn};
use std::collections::HashSet;
use std::time::Duration;

/// Loads and parses the clients JSON document.
pub fn load_clients_config(path: &str) -> Result<ClientsFile, InteropError> {
    let raw = read_config_file(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| InteropError::Configuration(format!("clients config is invalid: {}", e)))
}

impl ClientsFile {
    /// Circuit breaker settings derived from the global section.
    pub fn breaker_settings(&self) -> CircuitBreakerSettings {
        CircuitBreakerSettings {
            enabled: self.global_settings.enable_circuit_breaker,
            threshold: self.global_settings.circuit_breaker_threshold,
            timeout: Duration::from_millis(self.global_settings.circuit_breaker_timeout),
        }
    }
}

/// Clients configuration validator.
pub struct ClientsValidator;

impl ClientsValidator {
    pub fn validate(config: &ClientsFile) -> ValidationResult {
        let mut result = ValidationResult::new();

        if config.clients.is_empty() {
            result.add_warning("no downstream clients configured".to_string());
        }

        let mut seen_ids = HashSet::new();
        for client in &config.clients {
            if !seen_ids.insert(client.id.as_str()) {
                result.add_error(format!("duplicate client id '{}'", client.id));
            }
            if client.endpoint.is_empty() {
                result.add_error(format!("client '{}' has an empty endpoint", client.id));
            }
            if client.event_types.is_empty() {
                result.add_error(format!(
                    "client '{}' subscribes to no event types",
                    client.id
                ));
            }

            match client.auth_type {
                AuthType::Basic => {
                    let complete = client
                        .auth_config
                        .as_ref()
                        .map(|a| a.username.is_some() && a.password.is_some())
                        .unwrap_or(false);
                    if !complete {
                        result.add_error(format!(
                            "client '{}' uses basic auth without username/password",
                            client.id
                        ));
                    }
                }
                AuthType::Bearer => {
                    if client
                        .auth_config
                        .as_ref()
                        .and_then(|a| a.token.as_ref())
                        .is_none()
                    {
                        result.add_error(format!(
                            "client '{}' uses bearer auth without a token",
                            client.id
                        ));
                    }
                }
                AuthType::ApiKey => {
                    if client
                        .auth_config
                        .as_ref()
                        .and_then(|a| a.api_key.as_ref())
                        .is_none()
                    {
                        result.add_error(format!(
                            "client '{}' uses api-key auth without a key",
                            client.id
                        ));
                    }
                }
                AuthType::Oauth2 => {
                    result.add_warning(format!(
                        "client '{}' uses oauth2, which is reserved and sends no auth header",
                        client.id
                    ));
                }
                AuthType::None => {}
            }

            if !client.enabled {
                result.add_warning(format!("client '{}' is disabled", client.id));
            }
        }

        Self::log_results(&result);
        result
    }

    fn log_results(result: &ValidationResult) {
        if result.is_valid {
            info!("clients configuration validation passed");
        } else {
            for error in &result.errors {
                log::error!("clients validation error: {}", error);
            }
        }
        for warning in &result.warnings {
            warn!("clients validation warning: {}", warning);
        }
    }
}
