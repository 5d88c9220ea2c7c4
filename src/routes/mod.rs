//! HTTP endpoints the gateway serves itself.
//!
//! - [`health`] - `/_health`, `/_health/live`, `/_health/ready`
//! - [`metrics`] - `/metrics` exposition and the collector behind it
//! - [`proxy`] - the catch-all resource that feeds the dispatcher
//!
//! Registration order matters: observability endpoints are configured
//! before the proxy catch-all so they are answered in-band rather than
//! forwarded upstream.

pub mod health;
pub mod metrics;
pub mod proxy;
