use crate::routes::PipelineState;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;

/// Aggregate statistics endpoint: connection health, per-consumer
/// counters, circuit breaker states, and delivery/bridge totals.
pub async fn stats_endpoint(state: web::Data<PipelineState>) -> Result<HttpResponse> {
    let connection = state.manager.get_health();
    let consumers: Vec<_> = state.consumers.iter().map(|c| c.stats()).collect();
    let breakers = state.breakers.snapshot().await;

    let fanout = state.dispatcher.as_ref().map(|dispatcher| {
        let (dispatched, succeeded, failed) = dispatcher.stats();
        json!({
            "eventsDispatched": dispatched,
            "deliveriesSucceeded": succeeded,
            "deliveriesFailed": failed
        })
    });
    let bridge = state.bridge.as_ref().map(|bridge| bridge.stats());

    Ok(HttpResponse::Ok().json(json!({
        "service": state.service_name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "connection": connection,
        "consumers": consumers,
        "circuitBreakers": breakers,
        "fanout": fanout,
        "bridge": bridge
    })))
}

/// Configure stats routes
pub fn configure_stats(cfg: &mut web::ServiceConfig) {
    cfg.route("/stats", web::get().to(stats_endpoint));
}
