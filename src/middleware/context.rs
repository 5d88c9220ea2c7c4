//! Per-request context shared along the middleware chain.
//!
//! The pipeline orders rate limiting before authorization and both before
//! route selection, yet all three need the matched route and (sometimes)
//! the user identity. The first stage that needs one performs the lookup
//! and caches the result in the request extensions; later stages reuse it,
//! so each request is matched and authenticated at most once.

use actix_web::{HttpMessage, HttpRequest};
use log::debug;
use std::sync::Arc;

use crate::services::auth::{TokenValidator, UserContext};
use crate::utils::route_table::{RouteMatch, RouteTable};

/// Cached result of route matching, including a cached miss.
#[derive(Clone)]
struct CachedRoute(Option<Arc<RouteMatch>>);

/// Cached result of token extraction + validation. `None` means anonymous:
/// either no token was presented or it failed validation.
#[derive(Clone)]
struct CachedUser(Option<UserContext>);

/// Resolves the route for this request, consulting the cache first.
pub fn lookup_route(req: &HttpRequest, table: &RouteTable) -> Option<Arc<RouteMatch>> {
    if let Some(cached) = req.extensions().get::<CachedRoute>() {
        return cached.0.clone();
    }

    let matched = table
        .find_match(req.method().as_str(), req.path())
        .ok()
        .map(Arc::new);
    req.extensions_mut().insert(CachedRoute(matched.clone()));
    matched
}

/// Resolves the user context for this request, consulting the cache first.
///
/// Token extraction order: `Authorization: Bearer`, then the configured
/// cookie. A missing or invalid token yields an anonymous context; the
/// policy layer decides whether that is acceptable.
pub fn authenticate(
    req: &HttpRequest,
    validator: Option<&Arc<TokenValidator>>,
    cookie_name: Option<&str>,
) -> Option<UserContext> {
    if let Some(cached) = req.extensions().get::<CachedUser>() {
        return cached.0.clone();
    }

    let user = extract_token(req, cookie_name).and_then(|token| {
        let validator = validator?;
        match validator.validate(&token) {
            Ok(user) => Some(user),
            Err(e) => {
                debug!("token validation failed: {e}");
                None
            }
        }
    });

    req.extensions_mut().insert(CachedUser(user.clone()));
    user
}

fn extract_token(req: &HttpRequest, cookie_name: Option<&str>) -> Option<String> {
    if let Some(header) = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    cookie_name.and_then(|name| req.cookie(name).map(|c| c.value().to_string()))
}
