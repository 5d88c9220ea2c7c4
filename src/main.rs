//! Portico gateway server.
//!
//! Binds the listener, assembles the policy pipeline around the shared
//! route table and dispatcher, and drives the graceful-shutdown protocol.
//! Exit code 0 on clean shutdown, 1 on any startup failure.

use portico::config::settings::load_settings;
use portico::config::validation::ConfigValidator;
use portico::logs::logger::configure_logger;
use portico::middleware::access_log::AccessLog;
use portico::middleware::authorize::Authorize;
use portico::middleware::correlate::Correlate;
use portico::middleware::rate_limit::RateLimit;
use portico::middleware::recovery::Recovery;
use portico::routes::metrics::MetricsCollector;
use portico::routes::{health, metrics, proxy};
use portico::services::auth::TokenValidator;
use portico::services::circuit_breaker::{BreakerRegistry, CircuitBreakerConfig};
use portico::services::http::UpstreamDispatcher;
use portico::services::rate_limit::{MemoryStore, RateLimiter};
use portico::utils::route_table::RouteTable;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "portico", version, about = "Reverse-proxy HTTP API gateway")]
struct Args {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "./config.json")]
    config: String,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let settings = match load_settings(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    configure_logger(&settings.logging);

    info!("starting portico v{}", env!("CARGO_PKG_VERSION"));

    let validation = ConfigValidator::validate_comprehensive(&settings);
    for warning in &validation.warnings {
        warn!("config: {warning}");
    }
    if !validation.is_valid() {
        for e in &validation.errors {
            error!("config: {e}");
        }
        std::process::exit(1);
    }

    let table = match RouteTable::new(settings.routes.clone()) {
        Ok(table) => Arc::new(table),
        Err(e) => {
            error!("route compilation failed: {e}");
            std::process::exit(1);
        }
    };
    info!("compiled {} routes", table.route_count());

    let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default()));
    let dispatcher = UpstreamDispatcher::new(breakers.clone(), &settings.server);

    let store = MemoryStore::new();
    store.spawn_sweeper(Duration::from_secs(60));
    let limiter = Arc::new(RateLimiter::new(store));

    let validator = if settings.authorization.enabled {
        match TokenValidator::from_settings(&settings.authorization) {
            Ok(validator) => Some(Arc::new(validator)),
            Err(e) => {
                error!("authorization setup failed: {e}");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let collector = Arc::new(MetricsCollector::default());
    let cookie_name = settings.authorization.cookie_name.clone();
    let auth_enabled = settings.authorization.enabled;
    let rate_limit_enabled = settings.rate_limit.enabled;

    let host = settings.server.host.clone();
    let port = settings.server.port;

    let server = HttpServer::new(move || {
        // wrap order is reversed at execution time: Recovery runs outermost,
        // then Correlate, AccessLog, RateLimit, and Authorize innermost.
        App::new()
            .app_data(web::Data::new(breakers.clone()))
            .app_data(web::Data::new(collector.as_ref().clone()))
            .wrap(Authorize::new(
                table.clone(),
                validator.clone(),
                cookie_name.clone(),
                auth_enabled,
            ))
            .wrap(RateLimit::new(
                table.clone(),
                limiter.clone(),
                validator.clone(),
                cookie_name.clone(),
                rate_limit_enabled,
            ))
            .wrap(AccessLog::new(collector.clone()))
            .wrap(Correlate)
            .wrap(Recovery)
            .configure(health::configure_health)
            .configure(metrics::configure_metrics)
            .configure(|cfg| proxy::configure_proxy(cfg, table.clone(), dispatcher.clone()))
    })
    .shutdown_timeout(settings.server.shutdown_timeout_seconds)
    .disable_signals();

    let server = match server.bind((host.as_str(), port)) {
        Ok(bound) => {
            info!("listening on {host}:{port}");
            bound.run()
        }
        Err(e) => {
            error!("failed to bind {host}:{port}: {e}");
            std::process::exit(1);
        }
    };

    let handle = server.handle();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, draining in-flight requests");
        // stop(true) stops accepting, then waits up to shutdown_timeout for
        // in-flight requests before cancelling them.
        handle.stop(true).await;
    });

    server.await?;
    info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut terminate = match unix_signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("cannot listen for SIGTERM: {e}");
            let _ = signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
