//! HTTP endpoints for health and statistics reporting.

pub mod admin;
pub mod health;
pub mod stats;

use crate::services::circuit_breaker::CircuitBreakerRegistry;
use crate::services::connection::ConnectionManager;
use crate::services::consumer::EventConsumer;
use crate::services::fanout::ClientDispatcher;
use crate::services::openhim::OpenHimBridge;
use std::sync::Arc;
use std::time::Instant;

/// Shared state handed to the health and stats endpoints.
#[derive(Clone)]
pub struct PipelineState {
    pub service_name: String,
    pub manager: Arc<ConnectionManager>,
    pub consumers: Vec<Arc<EventConsumer>>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub dispatcher: Option<Arc<ClientDispatcher>>,
    pub bridge: Option<Arc<OpenHimBridge>>,
    pub started_at: Instant,
}
