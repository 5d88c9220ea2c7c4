use crate::models::settings::{LogFormat, Settings};
use log::debug;
use std::fs;
use std::path::Path;
use std::str::FromStr;

const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024;

/// Loads the configuration document from `path` and applies `GATEWAY_*`
/// environment overrides.
///
/// The file must exist, be readable and stay under 10 MB; the content is
/// JSON matching [`Settings`]. Full semantic validation happens afterwards
/// via `Settings::validate` and the comprehensive pass in
/// [`crate::config::validation`].
///
/// # Environment overrides
///
/// Scalar fields can be overridden without touching the file:
///
/// | variable | field |
/// |---|---|
/// | `GATEWAY_SERVER_HOST` | `server.host` |
/// | `GATEWAY_SERVER_PORT` | `server.port` |
/// | `GATEWAY_SERVER_TIMEOUT_SECONDS` | `server.timeout_seconds` |
/// | `GATEWAY_SERVER_SHUTDOWN_TIMEOUT_SECONDS` | `server.shutdown_timeout_seconds` |
/// | `GATEWAY_LOGGING_LEVEL` | `logging.level` |
/// | `GATEWAY_LOGGING_FORMAT` | `logging.format` (`text`/`json`) |
/// | `GATEWAY_AUTHORIZATION_ENABLED` | `authorization.enabled` |
/// | `GATEWAY_AUTHORIZATION_SECRET` | `authorization.secret` |
/// | `GATEWAY_AUTHORIZATION_COOKIE_NAME` | `authorization.cookie_name` |
/// | `GATEWAY_RATE_LIMIT_ENABLED` | `rate_limit.enabled` |
pub fn load_settings(path: &str) -> Result<Settings, Box<dyn std::error::Error>> {
    debug!("loading configuration from {path}");

    let path = Path::new(path);
    if !path.exists() {
        return Err(format!("config file not found: {}", path.display()).into());
    }

    let metadata = fs::metadata(path)
        .map_err(|e| format!("cannot read config file metadata: {e}"))?;
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "config file too large: {} bytes (max {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        )
        .into());
    }

    let raw = fs::read_to_string(path).map_err(|e| format!("cannot read config file: {e}"))?;
    let mut settings: Settings =
        serde_json::from_str(&raw).map_err(|e| format!("invalid config JSON: {e}"))?;

    apply_env_overrides(&mut settings);

    debug!("loaded configuration with {} routes", settings.routes.len());
    Ok(settings)
}

/// Applies `GATEWAY_*` environment variables on top of the loaded document.
pub fn apply_env_overrides(settings: &mut Settings) {
    override_string("GATEWAY_SERVER_HOST", &mut settings.server.host);
    override_parsed("GATEWAY_SERVER_PORT", &mut settings.server.port);
    override_parsed(
        "GATEWAY_SERVER_TIMEOUT_SECONDS",
        &mut settings.server.timeout_seconds,
    );
    override_parsed(
        "GATEWAY_SERVER_SHUTDOWN_TIMEOUT_SECONDS",
        &mut settings.server.shutdown_timeout_seconds,
    );

    override_string("GATEWAY_LOGGING_LEVEL", &mut settings.logging.level);
    if let Ok(value) = std::env::var("GATEWAY_LOGGING_FORMAT") {
        match value.to_ascii_lowercase().as_str() {
            "json" => settings.logging.format = LogFormat::Json,
            "text" => settings.logging.format = LogFormat::Text,
            other => eprintln!("ignoring unknown GATEWAY_LOGGING_FORMAT '{other}'"),
        }
    }

    override_parsed(
        "GATEWAY_AUTHORIZATION_ENABLED",
        &mut settings.authorization.enabled,
    );
    if let Ok(value) = std::env::var("GATEWAY_AUTHORIZATION_SECRET") {
        settings.authorization.secret = Some(value);
    }
    if let Ok(value) = std::env::var("GATEWAY_AUTHORIZATION_COOKIE_NAME") {
        settings.authorization.cookie_name = Some(value);
    }

    override_parsed("GATEWAY_RATE_LIMIT_ENABLED", &mut settings.rate_limit.enabled);
}

fn override_string(var: &str, target: &mut String) {
    if let Ok(value) = std::env::var(var) {
        *target = value;
    }
}

fn override_parsed<T: FromStr>(var: &str, target: &mut T) {
    if let Ok(value) = std::env::var(var) {
        match value.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => eprintln!("ignoring unparsable {var}='{value}'"),
        }
    }
}
