use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use botthrottle::config::BotThrottleConfig;
use botthrottle::http::{throttled_router, BotThrottle, HttpServer};
use botthrottle::ratelimit::{Clock, CounterStore, SweepTask, SystemClock, WindowLimiter};

/// Crawler-aware request throttling in front of an HTTP origin.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Botthrottle");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = BotThrottleConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        enabled = config.enabled,
        window_secs = config.window_secs,
        identities = config.identities.len(),
        listen_addr = %config.server.listen_addr,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store = Arc::new(CounterStore::new());
    let limiter = Arc::new(WindowLimiter::new(store, config.window()));
    let throttle = Arc::new(BotThrottle::new(&config, limiter.clone(), clock.clone()));

    let shutdown = CancellationToken::new();
    let sweeper = SweepTask::new(limiter, clock, config.sweep_interval()).start(shutdown.clone());

    let origin = Router::new().fallback(|| async { "OK" });
    let app = throttled_router(origin, throttle);
    let server = HttpServer::bind(config.server.listen_addr, app).await?;

    let server_shutdown = shutdown.clone();
    server
        .serve_with_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    sweeper.await?;

    info!("Botthrottle stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
