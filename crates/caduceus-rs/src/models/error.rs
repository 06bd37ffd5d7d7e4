//! Error taxonomy for the event pipeline.

use actix_web::HttpResponse;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum InteropError {
    #[error("Broker connection error: {0}")]
    Connection(String),
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Channel error: {0}")]
    Channel(String),
    #[error("Consumer already active for queue '{0}'")]
    ConsumerAlreadyActive(String),
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Invalid CloudEvent: {0}")]
    InvalidEvent(String),
    #[error("No route matched source '{event_source}' type '{event_type}'")]
    RouteNotFound { event_source: String, event_type: String },
    #[error("Transformation failed in rule '{rule}': {message}")]
    Transformation { rule: String, message: String },
    #[error("Schema validation failed for rule '{rule}' ({count} errors)")]
    SchemaValidation { rule: String, count: usize },
    #[error("Delivery to '{client}' failed: {message}")]
    Delivery {
        client: String,
        status: Option<u16>,
        message: String,
    },
    #[error("Circuit open for client '{0}'")]
    CircuitOpen(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Request timeout after {0}ms")]
    Timeout(u64),
}

impl InteropError {
    fn kind(&self) -> &'static str {
        match self {
            InteropError::Connection(_) | InteropError::NotConnected => "connection",
            InteropError::Channel(_) => "channel",
            InteropError::ConsumerAlreadyActive(_) => "consumer",
            InteropError::MalformedMessage(_) => "malformed",
            InteropError::InvalidEvent(_) => "invalid_event",
            InteropError::RouteNotFound { .. } => "route_not_found",
            InteropError::Transformation { .. } => "transformation",
            InteropError::SchemaValidation { .. } => "schema_validation",
            InteropError::Delivery { .. } => "delivery",
            InteropError::CircuitOpen(_) => "circuit_open",
            InteropError::Configuration(_) => "configuration",
            InteropError::Timeout(_) => "timeout",
        }
    }
}

impl From<lapin::Error> for InteropError {
    fn from(e: lapin::Error) -> Self {
        InteropError::Connection(e.to_string())
    }
}

impl actix_web::error::ResponseError for InteropError {
    fn error_response(&self) -> HttpResponse {
        let body = json!({
            "error": self.to_string(),
            "type": self.kind()
        });
        match self {
            InteropError::Timeout(_) => HttpResponse::GatewayTimeout().json(body),
            InteropError::RouteNotFound { .. } => HttpResponse::NotFound().json(body),
            InteropError::Configuration(_) => HttpResponse::BadRequest().json(body),
            InteropError::NotConnected | InteropError::Connection(_) => {
                HttpResponse::ServiceUnavailable().json(body)
            }
            _ => HttpResponse::InternalServerError().json(body),
        }
    }
}
