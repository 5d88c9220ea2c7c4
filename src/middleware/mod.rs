//! The policy pipeline.
//!
//! Every request flows through a fixed middleware composition:
//!
//! ```text
//! Accept -> Recovery -> Correlate -> AccessLog -> RateLimit -> Authorize -> Route+Dispatch
//! ```
//!
//! Each stage either decorates the request and forwards downstream or
//! short-circuits with a terminal response (429 from the rate limiter,
//! 401/403 from authorization, 500 from recovery). Stages keep their state
//! in the per-request extensions (see [`context`]) and are safe for
//! concurrent use; the chain itself is built once at startup.
//!
//! actix executes `wrap`ed middleware in reverse registration order, so the
//! server registers `Authorize` first and `Recovery` last to get the order
//! above (see `main.rs`).

pub mod access_log;
pub mod authorize;
pub mod context;
pub mod correlate;
pub mod rate_limit;
pub mod recovery;
