//! Data models and domain types for the portico gateway.
//!
//! - [`error`] - terminal error taxonomy with HTTP response mapping
//! - [`router`] - route, policy and rate-limit configuration
//! - [`settings`] - the full configuration document

pub mod error;
pub mod router;
pub mod settings;
