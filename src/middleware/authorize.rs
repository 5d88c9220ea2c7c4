//! Authorization middleware.
//!
//! Evaluates the matched route's policy against the request's user context.
//! Anonymous denials answer 401, insufficient grants answer 403; debug
//! builds add a `details` object listing required versus held grants.

use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error as ActixError, HttpResponse,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use log::warn;
use serde_json::json;
use std::rc::Rc;
use std::sync::Arc;

use crate::middleware::context::{authenticate, lookup_route};
use crate::middleware::correlate::request_correlation_id;
use crate::services::auth::{evaluate_policy, PolicyDecision, TokenValidator};
use crate::utils::route_table::RouteTable;

#[derive(Clone)]
pub struct Authorize {
    table: Arc<RouteTable>,
    validator: Option<Arc<TokenValidator>>,
    cookie_name: Option<String>,
    enabled: bool,
}

impl Authorize {
    pub fn new(
        table: Arc<RouteTable>,
        validator: Option<Arc<TokenValidator>>,
        cookie_name: Option<String>,
        enabled: bool,
    ) -> Self {
        Self {
            table,
            validator,
            cookie_name,
            enabled,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authorize
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = ActixError> + 'static,
    S::Future: 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = ActixError;
    type Transform = AuthorizeMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthorizeMiddleware {
            service: Rc::new(service),
            inner: self.clone(),
        })
    }
}

pub struct AuthorizeMiddleware<S> {
    service: Rc<S>,
    inner: Authorize,
}

impl<S, B> Service<ServiceRequest> for AuthorizeMiddleware<S>
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
                let res = service.call(req).await?;
                return Ok(res.map_into_boxed_body());
            };

            let user = authenticate(
                req.request(),
                inner.validator.as_ref(),
                inner.cookie_name.as_deref(),
            );

            match evaluate_policy(&matched.route, user.as_ref()) {
                PolicyDecision::Allow => {
                    let res = service.call(req).await?;
                    Ok(res.map_into_boxed_body())
                }
                PolicyDecision::DenyAnonymous { message } => {
                    let correlation_id = request_correlation_id(req.request());
                    warn!(
                        "unauthorized request to {} (correlation_id={})",
                        matched.route.pattern, correlation_id
                    );
                    let response = HttpResponse::Unauthorized().json(json!({
                        "error": "unauthorized",
                        "message": message,
                        "correlation_id": correlation_id,
                    }));
                    Ok(req.into_response(response))
                }
                PolicyDecision::DenyForbidden { message, details } => {
                    let correlation_id = request_correlation_id(req.request());
                    warn!(
                        "forbidden request to {} by user {} (correlation_id={})",
                        matched.route.pattern,
                        user.as_ref().map(|u| u.user_id.as_str()).unwrap_or("-"),
                        correlation_id
                    );
                    let mut body = json!({
                        "error": "forbidden",
                        "message": message,
                        "correlation_id": correlation_id,
                    });
                    if cfg!(debug_assertions) {
                        body["details"] = details;
                    }
                    let response = HttpResponse::Forbidden().json(body);
                    Ok(req.into_response(response))
                }
            }
        })
    }
}
