//! Route definitions and the routing configuration file model.
//!
//! Routing rules are declarative: wildcard patterns over the event source
//! and type, an optional content predicate, a priority, and a destination.
//! The whole set is loaded from a YAML document (see
//! [`crate::config::routing`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Matching strategy declared on a route. Informational for operators; the
/// match predicate itself is always source ∧ type ∧ condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteStrategy {
    Type,
    Source,
    Content,
    Hybrid,
    Default,
    Fallback,
}

/// Content predicate operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Regex,
}

/// Content predicate evaluated against the event document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteCondition {
    /// Dot-notated path over the event object (e.g. `data.eventData.priority`).
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    Http,
    Queue,
    Topic,
    Gateway,
}

/// Where a matched route sends the event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteDestination {
    #[serde(rename = "type")]
    pub destination_type: DestinationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
}

/// Optional per-route transform hint forwarded to the destination executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouteTransform {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub transform_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Per-route retry policy for destination delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteRetry {
    pub enabled: bool,
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

/// One declarative routing rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub strategy: RouteStrategy,
    /// 0–10, higher wins. Validated at load time.
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<RouteCondition>,
    pub destination: RouteDestination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<RouteTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RouteRetry>,
}

/// Behavior when no enabled route matches an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FallbackBehavior {
    /// Republish the event to `settings.fallbackQueue`.
    Fallback,
    /// Ack and log the event.
    Drop,
    /// Nack without requeue (dead-letter).
    Error,
}

impl Default for FallbackBehavior {
    fn default() -> Self {
        FallbackBehavior::Fallback
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSettings {
    #[serde(default)]
    pub fallback_behavior: FallbackBehavior,
    /// Queue receiving unrouted events under the `fallback` behavior.
    #[serde(default = "default_fallback_queue")]
    pub fallback_queue: String,
    #[serde(default = "default_true")]
    pub validate_on_load: bool,
    #[serde(default)]
    pub dynamic_reload: bool,
    #[serde(default = "default_reload_interval")]
    pub reload_interval: u64,
    #[serde(default)]
    pub enable_metrics: bool,
}

fn default_true() -> bool {
    true
}

fn default_fallback_queue() -> String {
    "interop.fallback".to_string()
}

fn default_reload_interval() -> u64 {
    30_000
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            fallback_behavior: FallbackBehavior::default(),
            fallback_queue: default_fallback_queue(),
            validate_on_load: true,
            dynamic_reload: false,
            reload_interval: default_reload_interval(),
            enable_metrics: false,
        }
    }
}

/// The full routing configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingConfig {
    #[serde(default)]
    pub metadata: RoutingMetadata,
    #[serde(default)]
    pub settings: RoutingSettings,
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
}
