use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{http::StatusCode, routing::post, Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use windowguard::config::{LoggingConfig, ServiceConfig};
use windowguard::http::{admin_router, build_router, HttpServer, ProtectedRoute, RateLimitState};
use windowguard::ratelimit::{
    spawn_reaper, Clock, GuardedLimiter, MonotonicClock, SlidingWindowRateLimiter,
};

/// Sliding-window rate limiting service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Emit JSON formatted logs
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    if args.log_json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Windowguard Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        admin_addr = %config.server.admin_addr,
        "Configuration loaded"
    );

    let rate_config = &config.rate_limiting;
    let limiter = Arc::new(SlidingWindowRateLimiter::new(rate_config.limiter_config()?));
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    info!(
        max_events = rate_config.max_events,
        window_seconds = rate_config.window_seconds,
        failure_policy = ?rate_config.failure_policy,
        "Rate limiter initialized"
    );

    // One flag stops both listeners and the reaper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(listen_for_shutdown(shutdown_tx));

    let reaper = if rate_config.reaper.enabled {
        Some(spawn_reaper(
            limiter.clone(),
            clock.clone(),
            rate_config.reaper.settings(),
            shutdown_rx.clone(),
        ))
    } else {
        None
    };

    let guarded = Arc::new(GuardedLimiter::new(
        limiter,
        rate_config.backend_timeout(),
        rate_config.failure_policy,
    ));
    let route = ProtectedRoute::new(
        rate_config.protected_methods.as_slice(),
        rate_config.protected_path_fragment.clone(),
    )?;
    let state = RateLimitState::new(guarded.clone(), clock, route);

    let protected = Router::new().route("/messages", post(accept_message));
    let public = HttpServer::new(config.server.http_addr, build_router(protected, state));
    let admin = HttpServer::new(config.server.admin_addr, admin_router(guarded));

    tokio::try_join!(
        public.serve_until(shutdown_rx.clone()),
        admin.serve_until(shutdown_rx),
    )?;

    if let Some(reaper) = reaper {
        reaper.await?;
    }

    info!("Windowguard Rate Limiting Service stopped");
    Ok(())
}

/// Stand-in for the protected application's message endpoint.
async fn accept_message(Json(message): Json<Value>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::CREATED,
        Json(json!({ "status": "accepted", "message": message })),
    )
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Raise the shutdown flag on Ctrl+C or SIGTERM.
async fn listen_for_shutdown(shutdown: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping public and admin listeners"),
        _ = terminate => info!("Received SIGTERM, stopping public and admin listeners"),
    }

    let _ = shutdown.send(true);
}
