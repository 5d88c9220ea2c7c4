//! Comprehensive startup validation.
//!
//! `Settings::validate` covers the hard constraints; this pass runs the
//! whole document through every check the gateway can do before binding,
//! collecting all errors at once (startup aborts) and warnings (logged and
//! tolerated) instead of failing on the first problem.

use std::collections::HashSet;

use crate::models::settings::Settings;
use crate::utils::route_table::RouteTable;

/// Outcome of the comprehensive validation pass.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the whole document: per-route constraints, pattern
    /// compilation, duplicate route detection, listener settings and
    /// authorization key material.
    pub fn validate_comprehensive(settings: &Settings) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(e) = settings.validate() {
            result.errors.push(e);
        }

        Self::check_routes(settings, &mut result);
        Self::check_server(settings, &mut result);
        Self::check_authorization(settings, &mut result);

        result
    }

    fn check_routes(settings: &Settings, result: &mut ValidationResult) {
        if settings.routes.is_empty() {
            result
                .warnings
                .push("no routes configured; every request will answer 404".to_string());
        }

        // Compiling a throwaway table surfaces pattern syntax errors with
        // the same diagnostics the real startup path would produce.
        if let Err(e) = RouteTable::new(settings.routes.clone()) {
            result.errors.push(e.to_string());
        }

        let mut seen: HashSet<(String, String)> = HashSet::new();
        for route in &settings.routes {
            for method in route.normalized_methods() {
                if !seen.insert((route.pattern.clone(), method.clone())) {
                    result.warnings.push(format!(
                        "duplicate route {} {} is shadowed by an earlier declaration",
                        method, route.pattern
                    ));
                }
            }

            if route.timeout_ms > 600_000 {
                result.warnings.push(format!(
                    "route {} has a timeout over 10 minutes",
                    route.pattern
                ));
            }
        }
    }

    fn check_server(settings: &Settings, result: &mut ValidationResult) {
        let server = &settings.server;

        if server.timeout_seconds == 0 {
            result
                .errors
                .push("server.timeout_seconds must be greater than 0".to_string());
        }

        match (&server.tls_cert, &server.tls_key) {
            (Some(_), None) | (None, Some(_)) => {
                result
                    .errors
                    .push("server.tls_cert and server.tls_key must be set together".to_string());
            }
            (Some(_), Some(_)) => {
                result.warnings.push(
                    "TLS material configured; termination is delegated to the deployment edge"
                        .to_string(),
                );
            }
            (None, None) => {}
        }
    }

    fn check_authorization(settings: &Settings, result: &mut ValidationResult) {
        let auth = &settings.authorization;
        if !auth.enabled {
            return;
        }

        if let Some(secret) = &auth.secret {
            if secret.len() < 32 {
                result
                    .errors
                    .push("authorization.secret must be at least 32 characters".to_string());
            }
        }

        if auth.cache_ttl_seconds == 0 {
            result.warnings.push(
                "authorization.cache_ttl_seconds is 0; every request pays a signature check"
                    .to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(json: &str) -> Settings {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn clean_config_passes() {
        let result = ConfigValidator::validate_comprehensive(&settings(
            r#"{
                "routes": [
                    { "pattern": "/api/**", "methods": ["GET"], "backend_url": "http://b" }
                ]
            }"#,
        ));
        assert!(result.is_valid(), "errors: {:?}", result.errors);
    }

    #[test]
    fn bad_pattern_is_an_error() {
        let result = ConfigValidator::validate_comprehensive(&settings(
            r#"{
                "routes": [
                    { "pattern": "/api/{", "methods": ["GET"], "backend_url": "http://b" }
                ]
            }"#,
        ));
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("invalid route pattern")));
    }

    #[test]
    fn duplicate_route_is_a_warning() {
        let result = ConfigValidator::validate_comprehensive(&settings(
            r#"{
                "routes": [
                    { "pattern": "/a", "methods": ["GET"], "backend_url": "http://b1" },
                    { "pattern": "/a", "methods": ["GET"], "backend_url": "http://b2" }
                ]
            }"#,
        ));
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("duplicate route")));
    }

    #[test]
    fn short_secret_is_an_error() {
        let result = ConfigValidator::validate_comprehensive(&settings(
            r#"{
                "authorization": { "enabled": true, "secret": "short" },
                "routes": [
                    { "pattern": "/a", "methods": ["GET"], "backend_url": "http://b" }
                ]
            }"#,
        ));
        assert!(!result.is_valid());
    }

    #[test]
    fn lone_tls_cert_is_an_error() {
        let result = ConfigValidator::validate_comprehensive(&settings(
            r#"{
                "server": { "tls_cert": "/etc/cert.pem" },
                "routes": [
                    { "pattern": "/a", "methods": ["GET"], "backend_url": "http://b" }
                ]
            }"#,
        ));
        assert!(!result.is_valid());
    }

    #[test]
    fn empty_routes_is_only_a_warning() {
        let result = ConfigValidator::validate_comprehensive(&settings(r#"{ "routes": [] }"#));
        assert!(result.is_valid());
        assert!(!result.warnings.is_empty());
    }
}
