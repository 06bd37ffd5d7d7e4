//! Downstream client configuration models.
//!
//! One [`ClientConfig`] per downstream consumer; the whole set plus
//! [`GlobalSettings`] is loaded from a JSON document (see
//! [`crate::config::clients`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthType {
    None,
    Basic,
    Bearer,
    ApiKey,
    Oauth2,
}

impl Default for AuthType {
    fn default() -> Self {
        AuthType::None
    }
}

/// Credential material matching the client's [`AuthType`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Header carrying the API key. Defaults to `X-API-Key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
}

/// One downstream consumer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub endpoint: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_config: Option<AuthConfig>,
    /// Request timeout in milliseconds. Falls back to the global default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    /// Base retry delay in milliseconds (scaled linearly by attempt number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
    /// Transformation rule names applied in sequence before delivery.
    #[serde(default)]
    pub transformation_rules: Vec<String>,
    /// Exact event types this client subscribes to. Must be non-empty.
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ClientConfig {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default = "default_true")]
    pub enable_circuit_breaker: bool,
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    /// Breaker cool-down in milliseconds.
    #[serde(default = "default_breaker_timeout")]
    pub circuit_breaker_timeout: u64,
    #[serde(default)]
    pub enable_metrics: bool,
    #[serde(default)]
    pub enable_audit_logging: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,
    #[serde(default = "default_retry_attempts")]
    pub default_retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub default_retry_delay: u64,
}

fn default_true() -> bool {
    true
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_timeout() -> u64 {
    60_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_timeout() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1_000
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            enable_circuit_breaker: true,
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_timeout: default_breaker_timeout(),
            enable_metrics: false,
            enable_audit_logging: false,
            log_level: default_log_level(),
            default_timeout: default_timeout(),
            default_retry_attempts: default_retry_attempts(),
            default_retry_delay: default_retry_delay(),
        }
    }
}

/// The full clients configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientsFile {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub global_settings: GlobalSettings,
}
