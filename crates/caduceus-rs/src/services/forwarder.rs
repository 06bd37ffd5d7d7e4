//! Executes a matched route's destination.
//!
//! Matched routes forward the consumed event either over HTTP, by
//! republishing to a broker queue or topic, or through the OpenHIM bridge.

use crate::models::error::InteropError;
use crate::models::event::CloudEvent;
use crate::models::route::{DestinationType, RouteDefinition};
use crate::services::connection::ConnectionManager;
use crate::services::openhim::OpenHimBridge;
use log::{debug, warn};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;

pub struct RouteForwarder {
    manager: Arc<ConnectionManager>,
    bridge: Option<Arc<OpenHimBridge>>,
    http: reqwest::Client,
}

impl RouteForwarder {
    pub fn new(manager: Arc<ConnectionManager>, bridge: Option<Arc<OpenHimBridge>>) -> Self {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            manager,
            bridge,
            http,
        }
    }

    /// Sends the event to the route's destination, honoring the per-route
    /// retry policy for HTTP targets.
    pub async fn forward(
        &self,
        route: &RouteDefinition,
        event: &CloudEvent,
    ) -> Result<(), InteropError> {
        match route.destination.destination_type {
            DestinationType::Http => self.forward_http(route, event).await,
            DestinationType::Queue | DestinationType::Topic => {
                self.republish(route, event).await
            }
            DestinationType::Gateway => match &self.bridge {
                Some(bridge) => bridge.send(event).await.map(|_| ()),
                None => Err(InteropError::Configuration(format!(
                    "route '{}' targets the gateway but no bridge is configured",
                    route.name
                ))),
            },
        }
    }

    async fn forward_http(
        &self,
        route: &RouteDefinition,
        event: &CloudEvent,
    ) -> Result<(), InteropError> {
        let destination = &route.destination;
        let endpoint = destination.endpoint.as_ref().ok_or_else(|| {
            InteropError::Configuration(format!("route '{}' has no endpoint", route.name))
        })?;
        let method = destination
            .method
            .as_deref()
            .and_then(|m| m.parse::<Method>().ok())
            .unwrap_or(Method::POST);
        let timeout = Duration::from_millis(destination.timeout.unwrap_or(30_000));
        let body =
            serde_json::to_vec(event).map_err(|e| InteropError::MalformedMessage(e.to_string()))?;

        let (max_attempts, backoff_ms) = route
            .retry
            .as_ref()
            .filter(|retry| retry.enabled)
            .map(|retry| (retry.max_attempts.max(1), retry.backoff_ms))
            .unwrap_or((1, 0));

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            let mut request = self
                .http
                .request(method.clone(), endpoint)
                .header("Content-Type", "application/json")
                .header("X-Event-Id", &event.id)
                .header("X-Event-Type", &event.event_type)
                .timeout(timeout)
                .body(body.clone());
            if let Some(headers) = &destination.headers {
                for (name, value) in headers {
                    request = request.header(name, value);
                }
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        "event {} forwarded to {} via route '{}'",
                        event.id, endpoint, route.name
                    );
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    last_error = format!("HTTP {}", status.as_u16());
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                warn!(
                    "route '{}' delivery attempt {}/{} failed ({})",
                    route.name, attempt, max_attempts, last_error
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }

        Err(InteropError::Delivery {
            client: route.name.clone(),
            status: None,
            message: last_error,
        })
    }

    /// Republishes the event to the destination queue or topic, preserving
    /// its id for downstream deduplication.
    async fn republish(
        &self,
        route: &RouteDefinition,
        event: &CloudEvent,
    ) -> Result<(), InteropError> {
        let (exchange, routing_key) = republish_target(route)?;
        self.manager.publish_event(exchange, routing_key, event).await?;
        debug!(
            "event {} republished to {}/{} via route '{}'",
            event.id, exchange, routing_key, route.name
        );
        Ok(())
    }
}

/// Resolves the (exchange, routing key) pair for a queue or topic
/// destination: the routing key falls back to the queue name, the exchange
/// to the broker default exchange.
pub fn republish_target(route: &RouteDefinition) -> Result<(&str, &str), InteropError> {
    let destination = &route.destination;
    let queue = destination
        .queue
        .as_deref()
        .filter(|q| !q.is_empty())
        .ok_or_else(|| {
            InteropError::Configuration(format!("route '{}' has no queue", route.name))
        })?;
    let exchange = destination.exchange.as_deref().unwrap_or("");
    let routing_key = destination.routing_key.as_deref().unwrap_or(queue);
    Ok((exchange, routing_key))
}
