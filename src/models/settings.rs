use crate::models::router::RouteConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Listener and upstream-client settings.
///
/// `tls_cert`/`tls_key` are accepted and validated so a fronting deployment
/// can keep one config document, but TLS termination itself is delegated to
/// the edge; the process binds the plain listener.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerSettings {
    /// Bind address, default `0.0.0.0`.
    #[serde(default = "default_host")]
    pub host: String,

    /// Plain listener port, default `8080`.
    #[serde(default = "default_port")]
    pub port: u16,

    /// TLS listener port (termination delegated to the deployment edge).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<String>,

    /// Default upstream deadline in seconds for routes with `timeout_ms = 0`.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Grace period for in-flight requests during shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    /// Retries after the first upstream attempt on transport failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds; attempt n sleeps `base * 2^(n-1)`.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    100
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls_port: None,
            tls_cert: None,
            tls_key: None,
            timeout_seconds: default_timeout_seconds(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

/// Output format for the process logger.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Text
    }
}

/// Logger configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingSettings {
    /// Base level: trace, debug, info, warn or error. Default info.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Regexes whose matches are redacted from log messages before write.
    #[serde(default)]
    pub sanitize: Vec<String>,

    /// Per-module level overrides, e.g. `{"portico::services": "debug"}`.
    #[serde(default)]
    pub components: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            sanitize: vec![],
            components: HashMap::new(),
        }
    }
}

/// Session-token validation settings.
///
/// Exactly one of `secret` (HS256) or `public_key` (RS256, PEM) must be set
/// when authorization is enabled and any route is non-public.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Shared secret for HS256 validation.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,

    /// PEM-encoded RSA public key for RS256 validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Cookie consulted when no `Authorization: Bearer` header is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    /// Upper bound on how long a validated token stays cached, in seconds.
    #[serde(default = "default_auth_cache_ttl")]
    pub cache_ttl_seconds: u64,
}

fn default_auth_cache_ttl() -> u64 {
    300
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: None,
            public_key: None,
            cookie_name: None,
            issuer: None,
            audience: None,
            cache_ttl_seconds: default_auth_cache_ttl(),
        }
    }
}

/// Rate limiter backend selection.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RateLimitSettings {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Backend kind; only `memory` ships in-process. A shared store plugs in
    /// behind the same trait.
    #[serde(default = "default_rate_limit_backend")]
    pub backend: String,

    /// Connection string for a shared store backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rate_limit_backend() -> String {
    "memory".to_string()
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            backend: default_rate_limit_backend(),
            store_url: None,
        }
    }
}

/// The complete gateway configuration document.
///
/// Loaded from a JSON file at startup; scalar fields can be overridden by
/// `GATEWAY_*` environment variables (see `config::settings`). Routes are
/// compiled once into the route table and never reloaded; a config change
/// is a restart.
///
/// # Document shape
///
/// ```json
/// {
///   "server":        { "port": 8080, "timeout_seconds": 30 },
///   "logging":       { "level": "info", "format": "text" },
///   "authorization": { "enabled": true, "secret": "..." },
///   "rate_limit":    { "enabled": true, "backend": "memory" },
///   "routes":        [ { "pattern": "/api/**", "methods": ["GET"], "backend_url": "http://b" } ]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub authorization: AuthSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    pub routes: Vec<RouteConfig>,
}

impl Settings {
    /// First-pass validation: every route definition plus the cross-cutting
    /// constraints serde cannot express. `config::validation` runs the
    /// comprehensive pass (warnings, duplicates, secret strength) on top.
    pub fn validate(&self) -> Result<(), String> {
        for route in &self.routes {
            route.validate()?;
        }

        let has_protected = self
            .routes
            .iter()
            .any(|r| r.auth_policy != crate::models::router::AuthPolicy::Public);

        if has_protected && !self.authorization.enabled {
            return Err(
                "authorization must be enabled when any route is non-public".to_string(),
            );
        }

        if self.authorization.enabled
            && self.authorization.secret.is_none()
            && self.authorization.public_key.is_none()
        {
            return Err(
                "authorization.secret or authorization.public_key is required when enabled"
                    .to_string(),
            );
        }

        if self.rate_limit.backend != "memory" {
            return Err(format!(
                "unsupported rate_limit backend: {}",
                self.rate_limit.backend
            ));
        }

        Ok(())
    }
}
