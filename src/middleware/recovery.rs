//! Panic recovery middleware. Outermost stage of the pipeline.
//!
//! A panic anywhere downstream is caught here; the stack is logged at ERROR
//! with the correlation id and, since middleware completes before body
//! streaming begins, a JSON 500 can always be written. Panics raised while
//! a response body is already streaming never reach this layer; the
//! transport truncates the connection instead.

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::FutureExt;
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::error;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use crate::middleware::correlate::request_correlation_id;

pub struct Recovery;

impl<S, B> Transform<S, ServiceRequest> for Recovery
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = RecoveryMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RecoveryMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct RecoveryMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RecoveryMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Shares the inner request, so extensions written downstream (the
        // correlation id) are visible here after a panic.
        let http_req = req.request().clone();
        let fut = self.service.call(req);

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result.map(|res| res.map_into_boxed_body()),
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic payload".to_string());
                    let correlation_id = request_correlation_id(&http_req);
                    let backtrace = std::backtrace::Backtrace::force_capture();

                    error!(
                        "recovered panic serving {} {} (correlation_id={}): {}\n{}",
                        http_req.method(),
                        http_req.path(),
                        correlation_id,
                        detail,
                        backtrace
                    );

                    // This response never passes back through the correlate
                    // stage (it sits inside this one), so mirror the header
                    // here.
                    let mut builder = HttpResponse::InternalServerError();
                    if let Ok(value) =
                        actix_web::http::header::HeaderValue::from_str(&correlation_id)
                    {
                        builder.insert_header((
                            actix_web::http::header::HeaderName::from_static("x-correlation-id"),
                            value,
                        ));
                    }
                    let response = builder.json(json!({
                        "error": "internal_server_error",
                        "correlation_id": correlation_id,
                    }));
                    Ok(ServiceResponse::new(http_req, response))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::correlate::Correlate;
    use actix_web::{test, web, App};

    async fn panicking() -> HttpResponse {
        panic!("handler exploded");
    }

    async fn healthy() -> HttpResponse {
        HttpResponse::Ok().body("fine")
    }

    #[actix_web::test]
    async fn panic_becomes_json_500() {
        let app = test::init_service(
            App::new()
                .wrap(Recovery)
                .route("/boom", web::get().to(panicking)),
        )
        .await;

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/boom").to_request()).await;
        assert_eq!(resp.status(), 500);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "internal_server_error");
    }

    #[actix_web::test]
    async fn panic_response_carries_correlation_id() {
        // Wraps run in reverse registration order: recovery outermost,
        // correlate inside it, as in the real pipeline.
        let app = test::init_service(
            App::new()
                .wrap(Correlate)
                .wrap(Recovery)
                .route("/boom", web::get().to(panicking)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/boom")
            .insert_header(("x-correlation-id", "panic-cid"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500);
        assert_eq!(resp.headers().get("x-correlation-id").unwrap(), "panic-cid");
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["correlation_id"], "panic-cid");
    }

    #[actix_web::test]
    async fn normal_responses_pass_through() {
        let app = test::init_service(
            App::new()
                .wrap(Recovery)
                .route("/ok", web::get().to(healthy)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        assert_eq!(resp.status(), 200);
    }
}
