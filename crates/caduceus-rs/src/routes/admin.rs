//! Routing configuration reload API endpoints.
//!
//! Lets operators trigger a manual routing reload and inspect the current
//! configuration version without restarting the service.

use actix_web::{post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::hot_reload::RoutingWatcher;

/// Response structure for reload operations
#[derive(Serialize, Deserialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub message: String,
    pub version: Option<u64>,
    pub timestamp: Option<String>,
}

/// Trigger manual routing configuration reload
///
/// # Endpoint
///
/// `POST /api/routing/reload`
///
/// Returns the new configuration version on success; a reload that fails
/// validation leaves the running configuration untouched.
#[post("/api/routing/reload")]
pub async fn reload_routing(watcher: web::Data<Arc<RoutingWatcher>>) -> impl Responder {
    match watcher.manual_reload().await {
        Ok(update) => HttpResponse::Ok().json(ReloadResponse {
            success: true,
            message: "Routing configuration reloaded successfully".to_string(),
            version: Some(update.version),
            timestamp: Some(update.timestamp.to_rfc3339()),
        }),
        Err(e) => HttpResponse::InternalServerError().json(ReloadResponse {
            success: false,
            message: format!("Failed to reload routing configuration: {}", e),
            version: None,
            timestamp: None,
        }),
    }
}

/// Get current routing configuration version and status
///
/// # Endpoint
///
/// `GET /api/routing/status`
#[actix_web::get("/api/routing/status")]
pub async fn routing_status(watcher: web::Data<Arc<RoutingWatcher>>) -> impl Responder {
    let current = watcher.current().await;

    HttpResponse::Ok().json(ReloadResponse {
        success: true,
        message: format!(
            "{} routes loaded",
            current.config.routes.len()
        ),
        version: Some(current.version),
        timestamp: Some(current.timestamp.to_rfc3339()),
    })
}

/// Configure routing admin endpoints
pub fn configure_admin(cfg: &mut web::ServiceConfig) {
    cfg.service(reload_routing).service(routing_status);
}
