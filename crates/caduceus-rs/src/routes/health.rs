use crate::routes::PipelineState;
use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use uuid::Uuid;

/// Health check endpoint.
///
/// `healthy` requires a healthy broker connection and every configured
/// consumer active; a subset active (or none started yet) is `degraded`;
/// a broken broker connection is `unhealthy`.
pub async fn health_check(state: web::Data<PipelineState>) -> Result<HttpResponse> {
    let broker_healthy = state.manager.is_healthy().await;
    let total = state.consumers.len();
    let active = state.consumers.iter().filter(|c| c.is_active()).count();

    let status = if broker_healthy && total > 0 && active == total {
        "healthy"
    } else if broker_healthy {
        "degraded"
    } else {
        "unhealthy"
    };

    let body = json!({
        "status": status,
        "service": state.service_name,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs(),
        "correlationId": Uuid::new_v4().to_string(),
        "consumers": {"active": active, "configured": total}
    });

    if status == "unhealthy" {
        Ok(HttpResponse::ServiceUnavailable().json(body))
    } else {
        Ok(HttpResponse::Ok().json(body))
    }
}

/// Readiness check endpoint (for Kubernetes).
pub async fn readiness_check(state: web::Data<PipelineState>) -> Result<HttpResponse> {
    let ready = state.manager.is_healthy().await;
    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "timestamp": chrono::Utc::now().to_rfc3339()
    });
    if ready {
        Ok(HttpResponse::Ok().json(body))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(body))
    }
}

/// Liveness check endpoint (for Kubernetes).
pub async fn liveness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Configure health check routes
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/live", web::get().to(liveness_check));
}
