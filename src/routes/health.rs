//! Health endpoints, served in-band alongside proxied traffic.
//!
//! - `GET /_health` - aggregated report including per-backend breaker states
//! - `GET /_health/live` - always 200 while the process runs
//! - `GET /_health/ready` - 200 when ready to receive traffic

use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use std::sync::Arc;

use crate::services::circuit_breaker::BreakerRegistry;

/// Aggregated health report with service information and the current state
/// of every circuit breaker.
///
/// # Response format
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.3.1",
///   "timestamp": "2025-03-15T10:30:00Z",
///   "backends": [
///     { "backend": "http://users:8080", "state": "closed", "consecutive_failures": 0 }
///   ]
/// }
/// ```
async fn health_report(breakers: web::Data<Arc<BreakerRegistry>>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "backends": breakers.snapshot(),
    })))
}

/// Liveness probe. Only fails when the process itself is broken, so a plain
/// 200 for as long as we can answer at all.
async fn liveness() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Readiness probe. The gateway has no external dependencies that gate
/// accepting traffic (backends degrade per-route via their breakers), so
/// readiness follows liveness once the route table is built.
async fn readiness() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ready",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Registers the health endpoints. Must be configured before the proxy
/// catch-all so these paths are served by the gateway itself.
pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/_health", web::get().to(health_report))
        .route("/_health/live", web::get().to(liveness))
        .route("/_health/ready", web::get().to(readiness));
}
