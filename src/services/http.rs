//! Upstream dispatch: request rewriting, retries and response relay.
//!
//! The dispatcher owns the pooled outbound client. For each matched route it
//! rewrites the inbound request (path, hop-by-hop stripping, forwarding
//! headers), gates the call through the backend's circuit breaker, retries
//! transport failures with exponential backoff, and streams the upstream
//! response back to the client.

use crate::middleware::correlate::request_correlation_id;
use crate::models::error::GatewayError;
use crate::models::settings::ServerSettings;
use crate::services::circuit_breaker::{BreakerRegistry, CircuitBreakerError};
use crate::utils::route_table::{Route, RouteMatch};

use actix_web::http::header::{HeaderMap as ActixHeaderMap, HeaderValue as ActixHeaderValue};
use actix_web::http::{Method as ActixMethod, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt;
use log::{debug, warn};
use reqwest::header::{HeaderMap as ReqwestHeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method as ReqwestMethod};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

/// Headers whose semantics apply to a single transport hop. Never forwarded
/// in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Resolves the client IP: first `X-Forwarded-For` entry, then `X-Real-IP`,
/// then the transport-level remote address (host part only).
pub fn client_ip(req: &HttpRequest) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-request inputs to header forwarding, separated from the request type
/// so the rewrite is a pure, testable function.
pub struct ForwardContext<'a> {
    pub client_ip: &'a str,
    /// `https` when the inbound leg was TLS, else `http`.
    pub proto: &'a str,
    /// Inbound `Host` header, mirrored to `X-Forwarded-Host`.
    pub inbound_host: Option<&'a str>,
    pub correlation_id: &'a str,
}

/// Builds the outbound header set: inbound headers minus hop-by-hop minus
/// `Host`, plus the gateway's forwarding headers.
///
/// `X-Forwarded-For` appends the client IP to any prior value; every other
/// forwarding header is overwritten, so forwarding an already-forwarded
/// request is idempotent modulo that one append.
pub fn build_upstream_headers(inbound: &ActixHeaderMap, ctx: &ForwardContext) -> ReqwestHeaderMap {
    let mut out = ReqwestHeaderMap::with_capacity(inbound.len() + 6);

    for (key, value) in inbound {
        let name = key.as_str();
        // Host is regenerated from the target URL by the outbound client.
        if name.eq_ignore_ascii_case("host") || is_hop_by_hop(name) {
            continue;
        }
        if let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(header_name, header_value);
        }
    }

    let forwarded_for = match out.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, ctx.client_ip),
        _ => ctx.client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        out.insert("x-forwarded-for", value);
    }

    if let Ok(value) = HeaderValue::from_str(ctx.proto) {
        out.insert("x-forwarded-proto", value);
    }

    if let Some(host) = ctx.inbound_host {
        if let Ok(value) = HeaderValue::from_str(host) {
            out.insert("x-forwarded-host", value);
        }
    }

    if !out.contains_key("x-real-ip") {
        if let Ok(value) = HeaderValue::from_str(ctx.client_ip) {
            out.insert("x-real-ip", value);
        }
    }

    out.insert("via", HeaderValue::from_static("1.1 gateway"));

    if let Ok(value) = HeaderValue::from_str(ctx.correlation_id) {
        out.insert("x-correlation-id", value);
    }

    out
}

/// Rewrites the request path for the backend: strip the configured prefix,
/// re-insert a leading slash if stripping consumed it, then prepend the
/// backend URL's base path.
pub fn rewrite_path(route: &Route, request_path: &str) -> String {
    let mut path: &str = request_path;
    if let Some(prefix) = &route.strip_prefix {
        if let Some(stripped) = path.strip_prefix(prefix.as_str()) {
            path = stripped;
        }
    }

    let normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    if route.backend_base_path.is_empty() {
        normalized
    } else {
        format!("{}{}", route.backend_base_path, normalized)
    }
}

fn to_reqwest_method(method: &ActixMethod) -> ReqwestMethod {
    match *method {
        ActixMethod::GET => ReqwestMethod::GET,
        ActixMethod::POST => ReqwestMethod::POST,
        ActixMethod::PUT => ReqwestMethod::PUT,
        ActixMethod::DELETE => ReqwestMethod::DELETE,
        ActixMethod::HEAD => ReqwestMethod::HEAD,
        ActixMethod::OPTIONS => ReqwestMethod::OPTIONS,
        ActixMethod::PATCH => ReqwestMethod::PATCH,
        _ => ReqwestMethod::GET,
    }
}

/// Why a single upstream attempt failed.
enum AttemptError {
    /// Network-layer failure reported by the transport; retryable.
    Transport(reqwest::Error),
    /// The route/global deadline elapsed; never retried.
    Deadline,
}

/// The upstream dispatcher.
///
/// One instance serves the whole process; it is cheap to clone because the
/// client, breaker registry and configuration are shared behind `Arc`s (the
/// reqwest client is internally reference-counted).
#[derive(Clone)]
pub struct UpstreamDispatcher {
    client: Client,
    breakers: Arc<BreakerRegistry>,
    default_timeout: Duration,
    max_retries: u32,
    retry_base: Duration,
}

impl UpstreamDispatcher {
    /// Builds the dispatcher and its pooled outbound client
    /// (10 idle connections per host, 90 s idle timeout).
    pub fn new(breakers: Arc<BreakerRegistry>, server: &ServerSettings) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build upstream HTTP client");

        Self {
            client,
            breakers,
            default_timeout: Duration::from_secs(server.timeout_seconds),
            max_retries: server.max_retries,
            retry_base: Duration::from_millis(server.retry_base_ms),
        }
    }

    /// Forwards a matched request to its backend and relays the response.
    ///
    /// # Attempt loop
    ///
    /// Up to `1 + max_retries` attempts, gated per attempt through the
    /// backend's breaker. Only transport-class failures retry, with backoff
    /// `retry_base * 2^(attempt-1)`, and only while the request body is
    /// empty or the method is `GET`/`HEAD`/`OPTIONS`; the body is fully
    /// buffered by the extractor, but non-idempotent methods stay
    /// single-shot. The whole loop shares one deadline: the route's
    /// `timeout_ms` when set, else the global default.
    ///
    /// # Breaker accounting
    ///
    /// Any completed HTTP round-trip, 2xx through 5xx, counts as breaker
    /// success; only transport failures and deadline expiry count against
    /// the failure threshold.
    pub async fn dispatch(
        &self,
        req: &HttpRequest,
        body: web::Bytes,
        matched: &RouteMatch,
    ) -> Result<HttpResponse, GatewayError> {
        let route = &matched.route;
        let correlation_id = request_correlation_id(req);

        let mut target = format!(
            "{}{}",
            route.backend_origin,
            rewrite_path(route, req.path())
        );
        if !req.query_string().is_empty() {
            target.push('?');
            target.push_str(req.query_string());
        }

        let method = to_reqwest_method(req.method());
        let ip = client_ip(req);
        let headers = {
            let conn_info = req.connection_info();
            let host = req.headers().get("host").and_then(|v| v.to_str().ok());
            let proto = if conn_info.scheme() == "https" { "https" } else { "http" };
            build_upstream_headers(
                req.headers(),
                &ForwardContext {
                    client_ip: &ip,
                    proto,
                    inbound_host: host,
                    correlation_id: &correlation_id,
                },
            )
        };

        let total_timeout = if route.timeout_ms > 0 {
            Duration::from_millis(route.timeout_ms)
        } else {
            self.default_timeout
        };
        let deadline = Instant::now() + total_timeout;

        let breaker = self.breakers.breaker_for(&route.backend_url);

        let retryable_request = body.is_empty()
            || method == ReqwestMethod::GET
            || method == ReqwestMethod::HEAD
            || method == ReqwestMethod::OPTIONS;
        let max_attempts = if retryable_request {
            1 + self.max_retries
        } else {
            1
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GatewayError::UpstreamTimeout {
                    timeout_ms: total_timeout.as_millis() as u64,
                    correlation_id,
                });
            }

            if attempt > 1 {
                warn!("retrying {} (attempt {attempt}/{max_attempts})", target);
            } else {
                debug!("forwarding to {}", target);
            }

            let outbound = self
                .client
                .request(method.clone(), &target)
                .headers(headers.clone())
                .body(body.clone());

            let result = breaker
                .call(async {
                    match timeout(remaining, outbound.send()).await {
                        Ok(Ok(response)) => Ok(response),
                        Ok(Err(e)) => Err(AttemptError::Transport(e)),
                        Err(_) => Err(AttemptError::Deadline),
                    }
                })
                .await;

            match result {
                Ok(response) => return relay_response(response, &correlation_id),
                Err(CircuitBreakerError::CircuitOpen) => {
                    warn!("circuit open for {}", route.backend_url);
                    return Err(GatewayError::CircuitOpen {
                        backend: route.backend_url.clone(),
                        correlation_id,
                    });
                }
                Err(CircuitBreakerError::OperationFailed(AttemptError::Deadline)) => {
                    return Err(GatewayError::UpstreamTimeout {
                        timeout_ms: total_timeout.as_millis() as u64,
                        correlation_id,
                    });
                }
                Err(CircuitBreakerError::OperationFailed(AttemptError::Transport(e))) => {
                    let transient = e.is_connect() || e.is_timeout();
                    if transient && attempt < max_attempts {
                        let backoff = self.retry_base * 2u32.pow(attempt - 1);
                        if Instant::now() + backoff < deadline {
                            sleep(backoff).await;
                            continue;
                        }
                    }
                    return Err(GatewayError::UpstreamTransport {
                        message: e.to_string(),
                        url: target,
                        correlation_id,
                    });
                }
            }
        }
    }
}

/// Copies the upstream response to the client: status verbatim, headers
/// minus hop-by-hop, `X-Gateway-Version` added, body streamed to EOF.
/// A mid-stream copy error is logged and the transport truncates the
/// connection; no error body is synthesized.
fn relay_response(
    upstream: reqwest::Response,
    correlation_id: &str,
) -> Result<HttpResponse, GatewayError> {
    let status = StatusCode::from_u16(upstream.status().as_u16()).map_err(|e| {
        GatewayError::Internal {
            message: format!("upstream produced invalid status: {e}"),
            correlation_id: correlation_id.to_string(),
        }
    })?;

    let mut builder = HttpResponse::build(status);
    for (key, value) in upstream.headers() {
        if is_hop_by_hop(key.as_str()) {
            continue;
        }
        if let Ok(header_value) = ActixHeaderValue::from_bytes(value.as_bytes()) {
            builder.append_header((key.as_str(), header_value));
        }
    }
    builder.insert_header(("x-gateway-version", env!("CARGO_PKG_VERSION")));

    let cid = correlation_id.to_string();
    let stream = upstream.bytes_stream().map_err(move |e| {
        warn!("response relay interrupted (correlation_id={cid}): {e}");
        std::io::Error::new(std::io::ErrorKind::Other, "upstream stream error")
    });

    Ok(builder.streaming(stream))
}
