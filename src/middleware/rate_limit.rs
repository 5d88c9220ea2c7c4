//! Rate limiting middleware.
//!
//! Resolves the matched route's limit definitions to concrete keys for this
//! request, asks the limiter, and either forwards downstream (stamping
//! `X-RateLimit-Limit`/`X-RateLimit-Remaining`) or short-circuits with a
//! 429 carrying `Retry-After`.

use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error as ActixError, HttpResponse,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::warn;
use serde_json::json;
use std::rc::Rc;
use std::sync::Arc;

use crate::middleware::context::{authenticate, lookup_route};
use crate::middleware::correlate::request_correlation_id;
use crate::models::router::LimitKeyType;
use crate::services::auth::TokenValidator;
use crate::services::http::client_ip;
use crate::services::rate_limit::{Decision, RateLimiter, ResolvedLimit};
use crate::utils::route_table::RouteTable;

#[derive(Clone)]
pub struct RateLimit {
    table: Arc<RouteTable>,
    limiter: Arc<RateLimiter>,
    validator: Option<Arc<TokenValidator>>,
    cookie_name: Option<String>,
    enabled: bool,
}

impl RateLimit {
    pub fn new(
        table: Arc<RouteTable>,
        limiter: Arc<RateLimiter>,
        validator: Option<Arc<TokenValidator>>,
        cookie_name: Option<String>,
        enabled: bool,
    ) -> Self {
        Self {
            table,
            limiter,
            validator,
            cookie_name,
            enabled,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = ActixError;
    type Transform = RateLimitMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitMiddleware {
            service: Rc::new(service),
            inner: self.clone(),
        })
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    inner: RateLimit,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = ActixError;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            if !inner.enabled {
                let res = service.call(req).await?;
                return Ok(res.map_into_boxed_body());
            }

            let Some(matched) = lookup_route(req.request(), &inner.table) else {
                // Unrouted requests fall through; the terminal handler 404s.
                let res = service.call(req).await?;
                return Ok(res.map_into_boxed_body());
            };

            if matched.route.rate_limits.is_empty() {
                let res = service.call(req).await?;
                return Ok(res.map_into_boxed_body());
            }

            let limits = resolve_limits(&req, &inner, &matched.route.rate_limits);
            let decision = inner.limiter.check(&limits).await;

            if !decision.allowed {
                let correlation_id = request_correlation_id(req.request());
                warn!(
                    "rate limit exceeded on {} (correlation_id={})",
                    matched.route.pattern, correlation_id
                );
                let mut builder = HttpResponse::TooManyRequests();
                builder.insert_header(("retry-after", decision.retry_after.to_string()));
                apply_limit_headers(&mut builder, &decision);
                let response = builder.json(json!({
                    "error": "rate_limited",
                    "message": "too many requests, retry later",
                    "correlation_id": correlation_id,
                }));
                return Ok(req.into_response(response));
            }

            let mut res = service.call(req).await?.map_into_boxed_body();
            if decision.limit > 0 {
                let headers = res.headers_mut();
                if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
                    headers.insert(HeaderName::from_static("x-ratelimit-limit"), v);
                }
                if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
                    headers.insert(HeaderName::from_static("x-ratelimit-remaining"), v);
                }
            }
            Ok(res)
        })
    }
}

fn apply_limit_headers(builder: &mut actix_web::HttpResponseBuilder, decision: &Decision) {
    builder.insert_header(("x-ratelimit-limit", decision.limit.to_string()));
    builder.insert_header(("x-ratelimit-remaining", decision.remaining.to_string()));
}

/// Resolves the route's limit definitions to concrete keys for this request.
///
/// `user` keys use the validated token's subject when one is present and
/// the literal `anonymous` otherwise, so unauthenticated traffic shares a
/// single bucket rather than bypassing the limit.
fn resolve_limits(
    req: &ServiceRequest,
    inner: &RateLimit,
    definitions: &[crate::models::router::LimitDefinition],
) -> Vec<ResolvedLimit> {
    definitions
        .iter()
        .map(|def| {
            let value = match def.key_type {
                LimitKeyType::Ip => client_ip(req.request()),
                LimitKeyType::User => authenticate(
                    req.request(),
                    inner.validator.as_ref(),
                    inner.cookie_name.as_deref(),
                )
                .map(|u| u.user_id)
                .unwrap_or_else(|| "anonymous".to_string()),
                LimitKeyType::Route => {
                    lookup_route(req.request(), &inner.table)
                        .map(|m| m.route.pattern.clone())
                        .unwrap_or_else(|| req.path().to_string())
                }
                LimitKeyType::Global => "global".to_string(),
            };
            ResolvedLimit {
                key_type: def.key_type,
                value,
                capacity: def.capacity,
                window_ms: def.window_ms,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::router::{AuthPolicy, LimitDefinition, RequireLogic, RouteConfig};
    use crate::services::rate_limit::MemoryStore;
    use actix_web::{test, web, App};

    fn limited_table() -> Arc<RouteTable> {
        Arc::new(
            RouteTable::new(vec![RouteConfig {
                pattern: "/limited".to_string(),
                methods: vec!["GET".to_string()],
                backend_url: "http://b".to_string(),
                strip_prefix: None,
                timeout_ms: 0,
                auth_policy: AuthPolicy::Public,
                required_roles: vec![],
                required_permissions: vec![],
                logic: RequireLogic::Any,
                rate_limits: vec![LimitDefinition {
                    key_type: LimitKeyType::Ip,
                    capacity: 3,
                    window_ms: 1000,
                }],
            }])
            .unwrap(),
        )
    }

    fn middleware(table: Arc<RouteTable>) -> RateLimit {
        RateLimit::new(
            table,
            Arc::new(RateLimiter::new(MemoryStore::new())),
            None,
            None,
            true,
        )
    }

    /// Waits out the tail of the current window so the burst below cannot
    /// straddle a boundary.
    async fn align_to_window(window_ms: u64) {
        let into = crate::services::rate_limit::now_ms() % window_ms;
        if into > window_ms / 2 {
            tokio::time::sleep(std::time::Duration::from_millis(window_ms - into + 5)).await;
        }
    }

    #[actix_web::test]
    async fn fourth_request_in_window_gets_429() {
        let table = limited_table();
        let app = test::init_service(
            App::new()
                .wrap(middleware(table))
                .route("/limited", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        align_to_window(1000).await;
        for i in 0..3 {
            let req = test::TestRequest::get()
                .uri("/limited")
                .insert_header(("x-forwarded-for", "5.5.5.5"))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), 200, "request {i} should pass");
            assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "3");
        }

        let req = test::TestRequest::get()
            .uri("/limited")
            .insert_header(("x-forwarded-for", "5.5.5.5"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 429);
        let retry_after: u64 = resp
            .headers()
            .get("retry-after")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after <= 1);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "rate_limited");
    }

    #[actix_web::test]
    async fn different_ips_do_not_share_buckets() {
        let table = limited_table();
        let app = test::init_service(
            App::new()
                .wrap(middleware(table))
                .route("/limited", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        for ip in ["1.1.1.1", "2.2.2.2"] {
            for _ in 0..3 {
                let req = test::TestRequest::get()
                    .uri("/limited")
                    .insert_header(("x-forwarded-for", ip))
                    .to_request();
                assert_eq!(test::call_service(&app, req).await.status(), 200);
            }
        }
    }

    #[actix_web::test]
    async fn unrouted_requests_pass_through() {
        let table = limited_table();
        let app = test::init_service(
            App::new()
                .wrap(middleware(table))
                .route("/other", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/other").to_request()).await;
        assert_eq!(resp.status(), 200);
        assert!(resp.headers().get("x-ratelimit-limit").is_none());
    }

    #[actix_web::test]
    async fn disabled_limiter_is_transparent() {
        let table = limited_table();
        let mw = RateLimit::new(
            table,
            Arc::new(RateLimiter::new(MemoryStore::new())),
            None,
            None,
            false,
        );
        let app = test::init_service(
            App::new()
                .wrap(mw)
                .route("/limited", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        for _ in 0..10 {
            let req = test::TestRequest::get().uri("/limited").to_request();
            assert_eq!(test::call_service(&app, req).await.status(), 200);
        }
    }
}
