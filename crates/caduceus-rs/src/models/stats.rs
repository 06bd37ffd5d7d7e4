//! Serializable statistics snapshots for health and stats reporting.
//!
//! The live counters are owned by the services that mutate them; these
//! structs are consistent point-in-time copies safe to hand to the HTTP
//! surface.

use serde::{Deserialize, Serialize};

/// Broker connection state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
    Closed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    pub uptime_seconds: u64,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub channel_count: usize,
}

/// Per-consumer counters. Single-writer (the message loop); read as a
/// whole-struct copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    pub queue: String,
    pub messages_consumed: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub messages_dead_lettered: u64,
    pub messages_duplicate: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub uptime_seconds: u64,
    pub messages_per_second: f64,
    pub active: bool,
}

/// Serializable view of one client's circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub client_id: String,
    pub is_open: bool,
    pub failure_count: u32,
    /// Milliseconds since the last recorded failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_ms_ago: Option<u64>,
    /// Milliseconds until the breaker allows the next attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_ms: Option<u64>,
}

/// Result of one client delivery inside a fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientDeliveryResult {
    pub client_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate outcome of fanning one event out to all subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub event_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ClientDeliveryResult>,
}

/// OpenHIM bridge counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub average_response_time_ms: f64,
}
