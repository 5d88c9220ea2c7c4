//! Business logic behind the request pipeline.
//!
//! - [`auth`] - token validation and policy evaluation
//! - [`circuit_breaker`] - per-backend failure detectors and their registry
//! - [`http`] - the upstream dispatcher
//! - [`rate_limit`] - fixed-window rate limiting

pub mod auth;
pub mod circuit_breaker;
pub mod http;
pub mod rate_limit;
