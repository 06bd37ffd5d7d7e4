//! OpenHIM bridge: single-endpoint routing by event source.
//!
//! A simpler alternative to multi-client fan-out. Events from the health
//! producer go to the health endpoint, events from the orders producer to
//! the orders endpoint, everything else to the default endpoint. Requests
//! carry basic auth and retry with exponential backoff.

use crate::models::error::InteropError;
use crate::models::event::CloudEvent;
use crate::models::stats::BridgeStats;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct OpenHimConfig {
    pub health_endpoint: String,
    pub orders_endpoint: String,
    pub default_endpoint: String,
    pub username: String,
    pub password: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
}

impl Default for OpenHimConfig {
    fn default() -> Self {
        Self {
            health_endpoint: "http://localhost:5001/health-events".to_string(),
            orders_endpoint: "http://localhost:5001/orders-events".to_string(),
            default_endpoint: "http://localhost:5001/events".to_string(),
            username: "interop".to_string(),
            password: "interop".to_string(),
            timeout_ms: 15_000,
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Default)]
struct BridgeCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    response_time_sum_ms: AtomicU64,
}

/// HTTP bridge that mediates consumed events to a single gateway.
pub struct OpenHimBridge {
    config: OpenHimConfig,
    http: reqwest::Client,
    counters: BridgeCounters,
}

impl OpenHimBridge {
    pub fn new(config: OpenHimConfig) -> Self {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            config,
            http,
            counters: BridgeCounters::default(),
        }
    }

    /// Picks the endpoint for an event by its source service.
    pub fn endpoint_for(&self, source: &str) -> &str {
        if source.ends_with("health-service") {
            &self.config.health_endpoint
        } else if source.ends_with("orders-service") {
            &self.config.orders_endpoint
        } else {
            &self.config.default_endpoint
        }
    }

    /// Forwards the event, retrying transient failures with exponential
    /// backoff.
    pub async fn send(&self, event: &CloudEvent) -> Result<u16, InteropError> {
        let endpoint = self.endpoint_for(&event.source).to_string();
        let body = serde_json::to_vec(event)
            .map_err(|e| InteropError::MalformedMessage(e.to_string()))?;
        let credentials = BASE64.encode(format!("{}:{}", self.config.username, self.config.password));
        let started = Instant::now();
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let total_attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            let request = self
                .http
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Basic {}", credentials))
                .header("X-Event-Id", &event.id)
                .header("X-Event-Source", &event.source)
                .timeout(Duration::from_millis(self.config.timeout_ms))
                .body(body.clone());

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        self.record(started, true);
                        debug!(
                            "event {} bridged to {} ({})",
                            event.id,
                            endpoint,
                            status.as_u16()
                        );
                        return Ok(status.as_u16());
                    }
                    last_error = format!("HTTP {}", status.as_u16());
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < total_attempts {
                let backoff = Duration::from_millis(
                    self.config.initial_backoff_ms * 2u64.saturating_pow(attempt - 1),
                );
                warn!(
                    "bridge attempt {}/{} for event {} failed ({}), retrying in {}ms",
                    attempt,
                    total_attempts,
                    event.id,
                    last_error,
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
            }
        }

        self.record(started, false);
        Err(InteropError::Delivery {
            client: "openhim".to_string(),
            status: None,
            message: last_error,
        })
    }

    fn record(&self, started: Instant, success: bool) {
        self.counters
            .response_time_sum_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        if success {
            self.counters.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> BridgeStats {
        let total = self.counters.total.load(Ordering::Relaxed);
        let sum = self.counters.response_time_sum_ms.load(Ordering::Relaxed);
        BridgeStats {
            total_requests: total,
            successful: self.counters.successful.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            average_response_time_ms: if total > 0 { sum as f64 / total as f64 } else { 0.0 },
        }
    }
}
