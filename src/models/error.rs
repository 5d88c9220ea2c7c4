use actix_web::{http::StatusCode, HttpResponse};
use serde_json::json;

/// Terminal errors produced while serving a request.
///
/// Only the error kind drives the HTTP status code; the message is carried
/// for logs and, in debug builds, for the response body. Every variant
/// carries the request's correlation id so the client-facing body and the
/// log line can be joined.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No configured route accepted the method/path pair.
    #[error("no route matches {method} {path}")]
    RouteNotFound {
        method: String,
        path: String,
        correlation_id: String,
    },

    /// Transport-level failure talking to the backend (connect, DNS, TLS,
    /// transport timeout) after retries were exhausted.
    #[error("upstream transport failure for {url}: {message}")]
    UpstreamTransport {
        message: String,
        url: String,
        correlation_id: String,
    },

    /// The per-route or global deadline elapsed before the backend answered.
    #[error("upstream call exceeded {timeout_ms}ms deadline")]
    UpstreamTimeout {
        timeout_ms: u64,
        correlation_id: String,
    },

    /// The backend's circuit breaker refused the dispatch.
    #[error("circuit open for backend {backend}")]
    CircuitOpen {
        backend: String,
        correlation_id: String,
    },

    /// A recovered panic or other internal defect.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        correlation_id: String,
    },
}

impl GatewayError {
    /// Stable machine-readable code used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound { .. } => "not_found",
            GatewayError::UpstreamTransport { .. } => "bad_gateway",
            GatewayError::UpstreamTimeout { .. } => "gateway_timeout",
            GatewayError::CircuitOpen { .. } => "service_unavailable",
            GatewayError::Internal { .. } => "internal_server_error",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            GatewayError::RouteNotFound { correlation_id, .. }
            | GatewayError::UpstreamTransport { correlation_id, .. }
            | GatewayError::UpstreamTimeout { correlation_id, .. }
            | GatewayError::CircuitOpen { correlation_id, .. }
            | GatewayError::Internal { correlation_id, .. } => correlation_id,
        }
    }

    /// Generic message safe to return to clients in production builds.
    fn public_message(&self) -> &'static str {
        match self {
            GatewayError::RouteNotFound { .. } => "no route matches the request",
            GatewayError::UpstreamTransport { .. } => "upstream request failed",
            GatewayError::UpstreamTimeout { .. } => "upstream request timed out",
            GatewayError::CircuitOpen { .. } => "backend temporarily unavailable",
            GatewayError::Internal { .. } => "internal server error",
        }
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::UpstreamTransport { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Full internal message goes to logs only; clients see the generic one
        // outside debug builds.
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.public_message().to_string()
        };

        let mut body = json!({
            "error": self.code(),
            "message": message,
            "correlation_id": self.correlation_id(),
        });

        if let GatewayError::RouteNotFound { method, path, .. } = self {
            body["method"] = json!(method);
            body["path"] = json!(path);
        }

        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::error::ResponseError;

    #[test]
    fn status_codes_follow_error_kind() {
        let e = GatewayError::RouteNotFound {
            method: "GET".into(),
            path: "/nope".into(),
            correlation_id: "c-1".into(),
        };
        assert_eq!(e.status_code(), StatusCode::NOT_FOUND);

        let e = GatewayError::UpstreamTransport {
            message: "connection refused".into(),
            url: "http://b/x".into(),
            correlation_id: "c-2".into(),
        };
        assert_eq!(e.status_code(), StatusCode::BAD_GATEWAY);

        let e = GatewayError::UpstreamTimeout {
            timeout_ms: 30_000,
            correlation_id: "c-3".into(),
        };
        assert_eq!(e.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let e = GatewayError::CircuitOpen {
            backend: "http://b".into(),
            correlation_id: "c-4".into(),
        };
        assert_eq!(e.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let e = GatewayError::Internal {
            message: "boom".into(),
            correlation_id: "c-5".into(),
        };
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_body_names_method_and_path() {
        let e = GatewayError::RouteNotFound {
            method: "POST".into(),
            path: "/missing".into(),
            correlation_id: "cid-9".into(),
        };
        let resp = e.error_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
