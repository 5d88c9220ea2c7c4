use portico::config::settings::load_settings;
use portico::config::validation::ConfigValidator;
use portico::models::router::AuthPolicy;
use portico::models::settings::{LogFormat, Settings};
use std::io::Write;

const FULL_CONFIG: &str = r#"{
    "server": {
        "host": "127.0.0.1",
        "port": 9090,
        "timeout_seconds": 15,
        "shutdown_timeout_seconds": 10,
        "max_retries": 2,
        "retry_base_ms": 50
    },
    "logging": {
        "level": "debug",
        "format": "json",
        "sanitize": ["Bearer [A-Za-z0-9._-]+"],
        "components": { "portico::services": "trace" }
    },
    "authorization": {
        "enabled": true,
        "secret": "0123456789abcdef0123456789abcdef",
        "cookie_name": "session",
        "issuer": "portico",
        "audience": "api-clients",
        "cache_ttl_seconds": 120
    },
    "rate_limit": { "enabled": true, "backend": "memory" },
    "routes": [
        {
            "pattern": "/api/v1/users/{id}",
            "methods": ["GET", "PUT"],
            "backend_url": "http://users:8080",
            "auth_policy": "role_based",
            "required_roles": ["admin"],
            "logic": "ALL",
            "timeout_ms": 5000,
            "rate_limits": [
                { "key_type": "user", "capacity": 50, "window_ms": 60000 }
            ]
        },
        {
            "pattern": "/v1/**",
            "methods": ["GET"],
            "backend_url": "http://legacy:8080/base",
            "strip_prefix": "/v1"
        }
    ]
}"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn full_document_round_trips() {
    let file = write_config(FULL_CONFIG);
    let settings = load_settings(file.path().to_str().unwrap()).unwrap();

    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 9090);
    assert_eq!(settings.server.timeout_seconds, 15);
    assert_eq!(settings.server.max_retries, 2);

    assert_eq!(settings.logging.level, "debug");
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.logging.sanitize.len(), 1);
    assert_eq!(
        settings.logging.components.get("portico::services").unwrap(),
        "trace"
    );

    assert!(settings.authorization.enabled);
    assert_eq!(settings.authorization.cookie_name.as_deref(), Some("session"));
    assert_eq!(settings.authorization.cache_ttl_seconds, 120);

    assert_eq!(settings.routes.len(), 2);
    let first = &settings.routes[0];
    assert_eq!(first.auth_policy, AuthPolicy::RoleBased);
    assert_eq!(first.timeout_ms, 5000);
    assert_eq!(first.rate_limits[0].capacity, 50);
    assert_eq!(settings.routes[1].strip_prefix.as_deref(), Some("/v1"));

    assert!(settings.validate().is_ok());
    let result = ConfigValidator::validate_comprehensive(&settings);
    assert!(result.is_valid(), "errors: {:?}", result.errors);
}

#[test]
fn defaults_apply_when_sections_missing() {
    let file = write_config(
        r#"{
            "routes": [
                { "pattern": "/x", "methods": ["get"], "backend_url": "http://b" }
            ]
        }"#,
    );
    let settings = load_settings(file.path().to_str().unwrap()).unwrap();

    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.server.timeout_seconds, 30);
    assert_eq!(settings.server.shutdown_timeout_seconds, 30);
    assert_eq!(settings.server.max_retries, 3);
    assert_eq!(settings.server.retry_base_ms, 100);
    assert_eq!(settings.logging.level, "info");
    assert!(!settings.authorization.enabled);
    assert!(settings.rate_limit.enabled);
    assert_eq!(settings.rate_limit.backend, "memory");

    // Lowercase method names are normalized at compile time.
    assert_eq!(settings.routes[0].normalized_methods(), vec!["GET"]);
}

#[test]
fn protected_routes_without_auth_config_fail_validation() {
    let file = write_config(
        r#"{
            "routes": [
                {
                    "pattern": "/x",
                    "methods": ["GET"],
                    "backend_url": "http://b",
                    "auth_policy": "authenticated"
                }
            ]
        }"#,
    );
    let settings = load_settings(file.path().to_str().unwrap()).unwrap();
    assert!(settings.validate().is_err());

    let result = ConfigValidator::validate_comprehensive(&settings);
    assert!(!result.is_valid());
}

#[test]
fn unknown_policy_value_is_rejected_at_parse_time() {
    let parsed: Result<Settings, _> = serde_json::from_str(
        r#"{
            "routes": [
                {
                    "pattern": "/x",
                    "methods": ["GET"],
                    "backend_url": "http://b",
                    "auth_policy": "mystery"
                }
            ]
        }"#,
    );
    assert!(parsed.is_err());
}

#[test]
fn bad_limit_definition_fails_validation() {
    let file = write_config(
        r#"{
            "routes": [
                {
                    "pattern": "/x",
                    "methods": ["GET"],
                    "backend_url": "http://b",
                    "rate_limits": [{ "key_type": "ip", "capacity": 0, "window_ms": 1000 }]
                }
            ]
        }"#,
    );
    let settings = load_settings(file.path().to_str().unwrap()).unwrap();
    assert!(settings.validate().is_err());
}
