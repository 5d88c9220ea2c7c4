//! The terminal proxy handler behind the catch-all route.
//!
//! Consults the route table (usually a cache hit; the policy middlewares
//! already looked the route up) and hands matched requests to the upstream
//! dispatcher. Misses answer 404. Errors are rendered here rather than
//! propagated, so the logging and correlate stages always see a concrete
//! response.

use actix_web::error::ResponseError;
use actix_web::{web, HttpRequest, HttpResponse};
use log::{error, warn};
use std::sync::Arc;

use crate::middleware::context::lookup_route;
use crate::middleware::correlate::request_correlation_id;
use crate::models::error::GatewayError;
use crate::services::http::UpstreamDispatcher;
use crate::utils::route_table::RouteTable;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    table: web::Data<Arc<RouteTable>>,
    dispatcher: web::Data<UpstreamDispatcher>,
) -> HttpResponse {
    let Some(matched) = lookup_route(&req, &table) else {
        let err = GatewayError::RouteNotFound {
            method: req.method().to_string(),
            path: req.path().to_string(),
            correlation_id: request_correlation_id(&req),
        };
        warn!("{err}");
        return err.error_response();
    };

    match dispatcher.dispatch(&req, body, &matched).await {
        Ok(response) => response,
        Err(err) => {
            if err.status_code().is_server_error() {
                error!("{err} (correlation_id={})", err.correlation_id());
            } else {
                warn!("{err} (correlation_id={})", err.correlation_id());
            }
            err.error_response()
        }
    }
}

/// Registers the catch-all proxy resource. Configure after the health and
/// metrics routes so those stay served in-band.
pub fn configure_proxy(
    cfg: &mut web::ServiceConfig,
    table: Arc<RouteTable>,
    dispatcher: UpstreamDispatcher,
) {
    cfg.app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
        .app_data(web::Data::new(table))
        .app_data(web::Data::new(dispatcher))
        .service(web::resource("/{tail:.*}").to(forward));
}
