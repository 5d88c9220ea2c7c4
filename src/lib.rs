//! # Portico API Gateway
//!
//! A reverse-proxy HTTP API gateway built with Rust and Actix Web. Portico
//! terminates client connections, matches each request against a compiled
//! route table, enforces authorization and rate-limit policies, and forwards
//! to static upstream backends with retries and per-backend circuit-breaker
//! protection.
//!
//! ## Request lifecycle
//!
//! ```text
//! Accept -> Recovery -> Correlate -> AccessLog -> RateLimit -> Authorize -> Route -> Dispatch -> Stream
//! ```
//!
//! ## Core features
//!
//! ### Routing
//! - Pattern templates with `{param}` captures, `*` segment wildcards and
//!   `**` tail wildcards
//! - Deterministic priority ordering: exact > parameterized > `*` > `**`
//! - Per-route method sets, upstream deadlines and prefix stripping
//!
//! ### Policy enforcement
//! - Fixed-window rate limits keyed by IP, user, route or globally
//! - JWT session validation with role- and permission-based route policies
//! - Correlation IDs threaded through logs, error bodies and upstream calls
//!
//! ### Reliability
//! - Per-backend three-state circuit breakers with bounded half-open probes
//! - Transport-failure retries with exponential backoff behind one deadline
//! - Panic recovery that still answers a well-formed JSON 500
//!
//! ## Module organization
//!
//! - **[`config`]** - configuration loading, env overrides, validation
//! - **[`logs`]** - logger construction and message sanitization
//! - **[`middleware`]** - the policy pipeline stages
//! - **[`models`]** - configuration and error types
//! - **[`routes`]** - health, metrics and the proxy catch-all
//! - **[`services`]** - dispatcher, breakers, limiter, token validation
//! - **[`utils`]** - the route table
//!
//! ## Configuration example
//!
//! ```json
//! {
//!   "server": { "port": 8080, "timeout_seconds": 30 },
//!   "authorization": { "enabled": true, "secret": "..." },
//!   "routes": [
//!     {
//!       "pattern": "/api/v1/users/{id}",
//!       "methods": ["GET", "PUT"],
//!       "backend_url": "http://user-service:8080",
//!       "auth_policy": "authenticated",
//!       "rate_limits": [{ "key_type": "ip", "capacity": 100, "window_ms": 60000 }]
//!     },
//!     { "pattern": "/static/**", "methods": ["GET"], "backend_url": "http://cdn-origin" }
//!   ]
//! }
//! ```

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
