//! CloudEvents 1.0 envelope and broker delivery metadata.
//!
//! A [`CloudEvent`] is the unit of exchange across the whole pipeline. It is
//! immutable once published; routing and transformation only ever produce
//! derived payloads from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The only CloudEvents specversion this pipeline accepts.
pub const SUPPORTED_SPECVERSION: &str = "1.0";

/// A CloudEvents 1.0 event in JSON structured mode.
///
/// Required attributes: `specversion`, `type`, `source`, `id`. Everything
/// else is optional; unknown attributes (e.g. the `correlationid` extension)
/// are preserved in `extensions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudEvent {
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

impl CloudEvent {
    /// Validates a decoded JSON document as a CloudEvent and converts it.
    ///
    /// Returns a message suitable for the permanent-failure path on any
    /// violation: non-object payload, missing/empty required attributes, or
    /// an unsupported `specversion`.
    pub fn from_json(value: Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "event payload is not a JSON object".to_string())?;

        for attr in ["specversion", "type", "source", "id"] {
            match obj.get(attr).and_then(Value::as_str) {
                Some(s) if !s.is_empty() => {}
                Some(_) => return Err(format!("required attribute '{}' is empty", attr)),
                None => return Err(format!("missing required attribute '{}'", attr)),
            }
        }

        let specversion = obj["specversion"].as_str().unwrap_or_default();
        if specversion != SUPPORTED_SPECVERSION {
            return Err(format!(
                "unsupported specversion '{}' (expected {})",
                specversion, SUPPORTED_SPECVERSION
            ));
        }

        serde_json::from_value(value).map_err(|e| format!("invalid CloudEvent: {}", e))
    }

    /// Returns an extension attribute by name, if present.
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.extensions.get(name)
    }

    /// The correlation id carried inside the event itself, if any:
    /// `data.metadata.correlationId` first, then the `correlationid`
    /// extension attribute.
    pub fn embedded_correlation_id(&self) -> Option<String> {
        if let Some(data) = &self.data {
            if let Some(id) = crate::utils::json_path::get(data, "metadata.correlationId")
                .and_then(Value::as_str)
            {
                return Some(id.to_string());
            }
        }
        self.extension("correlationid")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Broker-side delivery metadata for one message.
///
/// Created from the AMQP delivery; the consumer is the exclusive owner of
/// the corresponding ack/nack decision.
#[derive(Debug, Clone, Default)]
pub struct MessageEnvelope {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub timestamp: Option<u64>,
}

/// Context handed to the message handler alongside the event.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub correlation_id: String,
    pub queue: String,
    pub consumer_tag: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// Resolves the correlation id for a delivery.
///
/// Resolution order: correlation id embedded in the event (data metadata,
/// then the `correlationid` extension), broker correlation-id property,
/// message-id property, delivery tag, and finally the event id.
pub fn resolve_correlation_id(event: &CloudEvent, envelope: &MessageEnvelope) -> String {
    if let Some(id) = event.embedded_correlation_id() {
        return id;
    }
    if let Some(id) = &envelope.correlation_id {
        return id.clone();
    }
    if let Some(id) = &envelope.message_id {
        return id.clone();
    }
    if envelope.delivery_tag > 0 {
        return envelope.delivery_tag.to_string();
    }
    event.id.clone()
}
