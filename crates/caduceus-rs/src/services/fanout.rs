//! Parallel delivery of transformed events to downstream clients.
//!
//! For each event the dispatcher selects every enabled client subscribed to
//! the event type (and whose circuit is not open), applies the client's
//! transformation chain, and POSTs the payload with per-client auth,
//! timeout, and retry. Clients are dispatched concurrently and failures
//! never abort peers.

use crate::models::client::{AuthType, ClientConfig, GlobalSettings};
use crate::models::event::CloudEvent;
use crate::models::stats::{ClientDeliveryResult, DeliveryReport};
use crate::services::circuit_breaker::CircuitBreakerRegistry;
use crate::services::transformer::TransformationEngine;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::future::join_all;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fan-out dispatcher over a fixed client set.
pub struct ClientDispatcher {
    clients: Vec<ClientConfig>,
    defaults: GlobalSettings,
    breakers: Arc<CircuitBreakerRegistry>,
    engine: Arc<TransformationEngine>,
    http: reqwest::Client,
    events_dispatched: AtomicU64,
    deliveries_succeeded: AtomicU64,
    deliveries_failed: AtomicU64,
}

impl ClientDispatcher {
    pub fn new(
        clients: Vec<ClientConfig>,
        defaults: GlobalSettings,
        breakers: Arc<CircuitBreakerRegistry>,
        engine: Arc<TransformationEngine>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .expect("failed to build HTTP client");

        for client in &clients {
            if client.auth_type == AuthType::Oauth2 {
                warn!(
                    "client '{}' uses oauth2 auth, which is reserved; requests go out unauthenticated",
                    client.id
                );
            }
        }

        Self {
            clients,
            defaults,
            breakers,
            engine,
            http,
            events_dispatched: AtomicU64::new(0),
            deliveries_succeeded: AtomicU64::new(0),
            deliveries_failed: AtomicU64::new(0),
        }
    }

    /// Clients eligible for this event: enabled, subscribed to the exact
    /// type, and with a closed (or cool-down-elapsed) circuit.
    pub async fn select_clients(&self, event_type: &str) -> Vec<&ClientConfig> {
        let mut selected = Vec::new();
        for client in &self.clients {
            if !client.enabled || !client.subscribes_to(event_type) {
                continue;
            }
            if !self.breakers.allow(&client.id).await {
                debug!(
                    "skipping client '{}': circuit open",
                    client.id
                );
                continue;
            }
            selected.push(client);
        }
        selected
    }

    /// Fans the event out to all eligible clients concurrently.
    pub async fn dispatch(&self, event: &CloudEvent) -> DeliveryReport {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        let selected = self.select_clients(&event.event_type).await;

        let deliveries = selected
            .iter()
            .map(|client| self.deliver(client, event));
        let results: Vec<ClientDeliveryResult> = join_all(deliveries).await;

        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful;
        self.deliveries_succeeded
            .fetch_add(successful as u64, Ordering::Relaxed);
        self.deliveries_failed
            .fetch_add(failed as u64, Ordering::Relaxed);

        if !results.is_empty() {
            info!(
                "event {} fanned out to {} clients ({} ok, {} failed)",
                event.id,
                results.len(),
                successful,
                failed
            );
        }

        DeliveryReport {
            event_id: event.id.clone(),
            total: results.len(),
            successful,
            failed,
            results,
        }
    }

    async fn deliver(&self, client: &ClientConfig, event: &CloudEvent) -> ClientDeliveryResult {
        let started = Instant::now();
        let mut rule_used = None;

        // Apply the transformation chain; the first failure aborts this
        // client's delivery with a mapping-error result.
        let mut payload: Option<Value> = None;
        for rule_name in &client.transformation_rules {
            match self.engine.transform(event, Some(rule_name), false).await {
                Ok(response) if response.success => {
                    rule_used = Some(rule_name.clone());
                    payload = response.data;
                }
                Ok(response) => {
                    let detail = response
                        .errors
                        .iter()
                        .map(|e| format!("{}: {}", e.field, e.message))
                        .collect::<Vec<_>>()
                        .join("; ");
                    return mapping_failure(client, started, rule_used, detail);
                }
                Err(e) => {
                    return mapping_failure(client, started, rule_used, e.to_string());
                }
            }
        }

        // Without rules the raw event travels as-is.
        let payload = match payload {
            Some(payload) => payload,
            None => match serde_json::to_value(event) {
                Ok(value) => value,
                Err(e) => {
                    return mapping_failure(client, started, rule_used, e.to_string());
                }
            },
        };

        let headers = match build_headers(client, event) {
            Ok(headers) => headers,
            Err(message) => {
                return mapping_failure(client, started, rule_used, message);
            }
        };
        let body = payload_bytes(&payload);
        let content_type = content_type_for(&payload);

        let timeout = Duration::from_millis(client.timeout.unwrap_or(self.defaults.default_timeout));
        let retry_attempts = client
            .retry_attempts
            .unwrap_or(self.defaults.default_retry_attempts);
        let retry_delay = client.retry_delay.unwrap_or(self.defaults.default_retry_delay);
        let total_attempts = retry_attempts + 1;

        let mut last_status: Option<u16> = None;
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            let request = self
                .http
                .post(&client.endpoint)
                .headers(headers.clone())
                .header(CONTENT_TYPE, content_type)
                .timeout(timeout)
                .body(body.clone());

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());

                    if status.is_success() {
                        self.breakers.record_success(&client.id).await;
                        return ClientDeliveryResult {
                            client_id: client.id.clone(),
                            success: true,
                            status: last_status,
                            latency_ms: started.elapsed().as_millis() as u64,
                            attempts: attempt,
                            rule: rule_used,
                            error: None,
                        };
                    }

                    last_error = format!("HTTP {}", status.as_u16());
                    if status.is_client_error() {
                        // 4xx is permanent; no retry for this attempt chain.
                        return self
                            .failure(client, started, rule_used, last_status, attempt, last_error)
                            .await;
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < total_attempts {
                let delay = retry_delay_for(retry_delay, attempt);
                debug!(
                    "retrying client '{}' in {}ms (attempt {}/{})",
                    client.id,
                    delay.as_millis(),
                    attempt + 1,
                    total_attempts
                );
                tokio::time::sleep(delay).await;
            }
        }

        self.failure(client, started, rule_used, last_status, total_attempts, last_error)
            .await
    }

    /// Delivery failure: recorded against the client's circuit breaker.
    async fn failure(
        &self,
        client: &ClientConfig,
        started: Instant,
        rule: Option<String>,
        status: Option<u16>,
        attempts: u32,
        error: String,
    ) -> ClientDeliveryResult {
        warn!("delivery to client '{}' failed: {}", client.id, error);
        self.breakers.record_failure(&client.id).await;
        ClientDeliveryResult {
            client_id: client.id.clone(),
            success: false,
            status,
            latency_ms: started.elapsed().as_millis() as u64,
            attempts,
            rule,
            error: Some(error),
        }
    }

    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.events_dispatched.load(Ordering::Relaxed),
            self.deliveries_succeeded.load(Ordering::Relaxed),
            self.deliveries_failed.load(Ordering::Relaxed),
        )
    }
}

/// Transformation or request-construction failure: the endpoint was never
/// reached, so the circuit breaker is left untouched.
fn mapping_failure(
    client: &ClientConfig,
    started: Instant,
    rule: Option<String>,
    error: String,
) -> ClientDeliveryResult {
    warn!(
        "delivery to client '{}' aborted before send: {}",
        client.id, error
    );
    ClientDeliveryResult {
        client_id: client.id.clone(),
        success: false,
        status: None,
        latency_ms: started.elapsed().as_millis() as u64,
        attempts: 0,
        rule,
        error: Some(error),
    }
}

/// Delay before the next attempt: `retry_delay × attempt`, scaling linearly
/// with the attempt index.
pub fn retry_delay_for(retry_delay_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(retry_delay_ms * attempt as u64)
}

/// `text/plain` for HL7 pipe-delimited strings, `application/json`
/// otherwise.
pub fn content_type_for(payload: &Value) -> &'static str {
    match payload.as_str() {
        Some(s) if s.starts_with("MSH") => "text/plain",
        _ => "application/json",
    }
}

fn payload_bytes(payload: &Value) -> Vec<u8> {
    match payload.as_str() {
        Some(s) => s.as_bytes().to_vec(),
        None => serde_json::to_vec(payload).unwrap_or_default(),
    }
}

/// Correlation and auth headers for one client request.
pub fn build_headers(client: &ClientConfig, event: &CloudEvent) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();

    let mut insert = |name: &str, value: &str| -> Result<(), String> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("invalid header name '{}': {}", name, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid header value for {}: {}", name, e))?;
        headers.insert(name, value);
        Ok(())
    };

    insert("X-Event-Id", &event.id)?;
    insert("X-Event-Type", &event.event_type)?;
    insert("X-Event-Source", &event.source)?;
    insert("X-Client-Id", &client.id)?;

    let auth = client.auth_config.as_ref();
    match client.auth_type {
        AuthType::None | AuthType::Oauth2 => {}
        AuthType::Basic => {
            let (username, password) = auth
                .and_then(|a| Some((a.username.as_ref()?, a.password.as_ref()?)))
                .ok_or_else(|| format!("client '{}' lacks basic credentials", client.id))?;
            let token = BASE64.encode(format!("{}:{}", username, password));
            insert("Authorization", &format!("Basic {}", token))?;
        }
        AuthType::Bearer => {
            let token = auth
                .and_then(|a| a.token.as_ref())
                .ok_or_else(|| format!("client '{}' lacks a bearer token", client.id))?;
            insert("Authorization", &format!("Bearer {}", token))?;
        }
        AuthType::ApiKey => {
            let config = auth.ok_or_else(|| format!("client '{}' lacks an API key", client.id))?;
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| format!("client '{}' lacks an API key", client.id))?;
            let header = config.header_name.as_deref().unwrap_or("X-API-Key");
            insert(header, key)?;
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::client::AuthConfig;
    use serde_json::json;

    fn client(auth_type: AuthType, auth_config: Option<AuthConfig>) -> ClientConfig {
        ClientConfig {
            id: "fhir-client".to_string(),
            name: "FHIR Client".to_string(),
            enabled: true,
            endpoint: "http://localhost:9000/events".to_string(),
            auth_type,
            auth_config,
            timeout: None,
            retry_attempts: None,
            retry_delay: None,
            transformation_rules: vec![],
            event_types: vec!["health.patient.registered".to_string()],
            metadata: None,
        }
    }

    fn event() -> CloudEvent {
        CloudEvent::from_json(json!({
            "specversion": "1.0",
            "type": "health.patient.registered",
            "source": "smile.health-service",
            "id": "e1"
        }))
        .unwrap()
    }

    #[test]
    fn test_correlation_headers() {
        let headers = build_headers(&client(AuthType::None, None), &event()).unwrap();
        assert_eq!(headers.get("X-Event-Id").unwrap(), "e1");
        assert_eq!(headers.get("X-Event-Type").unwrap(), "health.patient.registered");
        assert_eq!(headers.get("X-Event-Source").unwrap(), "smile.health-service");
        assert_eq!(headers.get("X-Client-Id").unwrap(), "fhir-client");
        assert!(headers.get("Authorization").is_none());
    }

    #[test]
    fn test_basic_auth_header() {
        let auth = AuthConfig {
            username: Some("svc".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let headers = build_headers(&client(AuthType::Basic, Some(auth)), &event()).unwrap();
        // base64("svc:secret")
        assert_eq!(headers.get("Authorization").unwrap(), "Basic c3ZjOnNlY3JldA==");
    }

    #[test]
    fn test_basic_auth_without_credentials_fails() {
        let result = build_headers(&client(AuthType::Basic, None), &event());
        assert!(result.is_err());
    }

    #[test]
    fn test_bearer_auth_header() {
        let auth = AuthConfig {
            token: Some("tok-123".to_string()),
            ..Default::default()
        };
        let headers = build_headers(&client(AuthType::Bearer, Some(auth)), &event()).unwrap();
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer tok-123");
    }

    #[test]
    fn test_api_key_header_default_and_custom_name() {
        let auth = AuthConfig {
            api_key: Some("k1".to_string()),
            ..Default::default()
        };
        let headers = build_headers(&client(AuthType::ApiKey, Some(auth)), &event()).unwrap();
        assert_eq!(headers.get("X-API-Key").unwrap(), "k1");

        let auth = AuthConfig {
            api_key: Some("k2".to_string()),
            header_name: Some("X-Custom-Key".to_string()),
            ..Default::default()
        };
        let headers = build_headers(&client(AuthType::ApiKey, Some(auth)), &event()).unwrap();
        assert_eq!(headers.get("X-Custom-Key").unwrap(), "k2");
    }

    #[test]
    fn test_content_type_detection() {
        assert_eq!(content_type_for(&json!({"a": 1})), "application/json");
        assert_eq!(content_type_for(&json!("MSH|^~\\&|...")), "text/plain");
        assert_eq!(content_type_for(&json!("not hl7")), "application/json");
    }

    #[test]
    fn test_retry_delay_scales_linearly() {
        assert_eq!(retry_delay_for(500, 1), Duration::from_millis(500));
        assert_eq!(retry_delay_for(500, 2), Duration::from_millis(1_000));
        assert_eq!(retry_delay_for(500, 3), Duration::from_millis(1_500));
    }
}
