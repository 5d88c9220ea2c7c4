//! Access logging middleware.
//!
//! One line per request: method, path, status, duration, response bytes and
//! client IP, tagged with the correlation id. Severity follows the status
//! class: INFO for 2xx/3xx, WARN for 4xx, ERROR for 5xx. The same hook
//! feeds the metrics collector.

use actix_web::{
    body::{BodySize, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::{log, Level};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::middleware::correlate::request_correlation_id;
use crate::routes::metrics::MetricsCollector;
use crate::services::http::client_ip;

#[derive(Clone)]
pub struct AccessLog {
    metrics: Arc<MetricsCollector>,
}

impl AccessLog {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AccessLog
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AccessLogMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AccessLogMiddleware {
            service: Rc::new(service),
            metrics: self.metrics.clone(),
        })
    }
}

pub struct AccessLogMiddleware<S> {
    service: Rc<S>,
    metrics: Arc<MetricsCollector>,
}

impl<S, B> Service<ServiceRequest> for AccessLogMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_ip = client_ip(req.request());
        let correlation_id = request_correlation_id(req.request());
        let metrics = self.metrics.clone();

        metrics.request_started();

        let fut = self.service.call(req);
        Box::pin(async move {
            let result = fut.await;
            let duration = start.elapsed();

            let (status, bytes) = match &result {
                Ok(res) => {
                    let bytes = match res.response().body().size() {
                        BodySize::Sized(n) => n,
                        // Streamed relays report their size as unknown.
                        _ => 0,
                    };
                    (res.status(), bytes)
                }
                Err(e) => (e.as_response_error().status_code(), 0),
            };

            let level = if status.is_server_error() {
                Level::Error
            } else if status.is_client_error() {
                Level::Warn
            } else {
                Level::Info
            };
            log!(
                level,
                "{} {} {} {}ms {}B {} correlation_id={}",
                method,
                path,
                status.as_u16(),
                duration.as_millis(),
                bytes,
                remote_ip,
                correlation_id
            );

            metrics.request_finished(status.as_u16(), duration, bytes);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App, HttpResponse};
    use std::sync::atomic::Ordering;

    #[actix_web::test]
    async fn records_metrics_per_request() {
        let metrics = Arc::new(MetricsCollector::default());
        let app = test::init_service(
            App::new()
                .wrap(AccessLog::new(metrics.clone()))
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().body("four") }))
                .route("/missing", web::get().to(|| async { HttpResponse::NotFound().finish() })),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        assert_eq!(resp.status(), 200);
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/missing").to_request()).await;
        assert_eq!(resp.status(), 404);

        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.requests_success.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.requests_client_error.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.response_bytes_total.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.active_requests.load(Ordering::Relaxed), 0);
    }
}
