//! Logger construction.
//!
//! Text output is a pipe-separated line with a colored level column; JSON
//! output is one object per line for log shippers. Both run every message
//! through the configured sanitize regexes before it reaches the sink, so
//! secrets matched by config never land in a log file.

use chrono::{Local, Utc};
use env_logger::Builder;
use log::LevelFilter;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::json;
use std::env;
use std::io::Write;

use crate::models::settings::{LogFormat, LoggingSettings};

static SANITIZERS: OnceCell<Vec<Regex>> = OnceCell::new();

const REDACTED: &str = "[redacted]";

/// Replaces every match of the configured sanitize patterns. Pure; safe to
/// call from any thread.
pub fn sanitize(message: &str) -> String {
    match SANITIZERS.get() {
        Some(patterns) if !patterns.is_empty() => {
            let mut out = message.to_string();
            for pattern in patterns {
                out = pattern.replace_all(&out, REDACTED).into_owned();
            }
            out
        }
        _ => message.to_string(),
    }
}

fn parse_level(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        other => {
            eprintln!("unknown log level '{other}', using info");
            LevelFilter::Info
        }
    }
}

/// Configures and installs the process logger. Call once at startup, before
/// anything logs.
///
/// Honors `NO_COLOR` for the text format; per-component overrides map to
/// module filters, e.g. `{"portico::services": "debug"}`.
pub fn configure_logger(settings: &LoggingSettings) {
    let patterns: Vec<Regex> = settings
        .sanitize
        .iter()
        .filter_map(|source| match Regex::new(source) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                eprintln!("ignoring invalid sanitize pattern '{source}': {e}");
                None
            }
        })
        .collect();
    let _ = SANITIZERS.set(patterns);

    let mut builder = Builder::new();
    builder.filter_level(parse_level(&settings.level));
    for (component, level) in &settings.components {
        builder.filter_module(component, parse_level(level));
    }

    match settings.format {
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = json!({
                    "ts": Utc::now().to_rfc3339(),
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "message": sanitize(&record.args().to_string()),
                });
                writeln!(buf, "{line}")
            });
        }
        LogFormat::Text => {
            let no_color = env::var("NO_COLOR").is_ok();
            builder.format(move |buf, record| {
                // Pad before coloring so escape codes never skew the column.
                let padded = format!("{:<5}", record.level());
                let level = if no_color {
                    padded
                } else {
                    let code = match record.level() {
                        log::Level::Error => "31",
                        log::Level::Warn => "33",
                        log::Level::Info => "32",
                        log::Level::Debug => "34",
                        log::Level::Trace => "35",
                    };
                    format!("\x1b[{code}m{padded}\x1b[0m")
                };

                writeln!(
                    buf,
                    "{} | {} | {}:{} | {}",
                    Local::now().format("%b %d %H:%M:%S%.3f"),
                    level,
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    sanitize(&record.args().to_string()),
                )
            });
        }
    }

    builder.init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_accepts_known_names() {
        assert_eq!(parse_level("trace"), LevelFilter::Trace);
        assert_eq!(parse_level("DEBUG"), LevelFilter::Debug);
        assert_eq!(parse_level("warning"), LevelFilter::Warn);
        assert_eq!(parse_level("nonsense"), LevelFilter::Info);
    }

    #[test]
    fn sanitize_without_patterns_is_identity() {
        // SANITIZERS is unset in unit tests unless another test set it.
        assert_eq!(sanitize("plain message"), "plain message");
    }
}
