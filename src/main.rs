//! Main entry point for the Practice Room coordinator service
//!
//! Initializes configuration, logging and the coordinator, serves the
//! WebSocket and operational endpoints, and shuts down gracefully on
//! SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use practice_room::config::{validate_config, AppConfig};
use practice_room::coordinator::MatchCoordinator;
use practice_room::gateway::ws::WsGateway;
use practice_room::metrics::MetricsCollector;
use practice_room::question::StaticQuestionSelector;
use practice_room::service::{serve, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Practice Room Coordinator - criteria matchmaking and paired sessions
#[derive(Parser)]
#[command(
    name = "practice-room",
    version,
    about = "Matchmaking and paired-session coordinator for peer coding practice",
    long_about = "Practice Room pairs users by exercise criteria (complexity, category, \
                 language), mediates the mutual-acceptance handshake over WebSocket, \
                 assigns a question and shared room to confirmed pairs, and tracks \
                 session lifecycle and connection liveness with reconnection grace."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override HTTP server port")]
    http_port: Option<u16>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Stand up the coordinator locally and verify it answers a stats query
fn perform_health_check(config: &AppConfig) -> Result<()> {
    info!("Performing health check...");

    let gateway = Arc::new(WsGateway::new());
    let metrics = Arc::new(MetricsCollector::new()?);
    let coordinator = MatchCoordinator::new(
        gateway,
        Arc::new(StaticQuestionSelector::new()),
        config.matchmaking.clone(),
        metrics,
    );

    match coordinator.stats() {
        Ok(stats) => {
            println!("Health Check: healthy");
            println!("  Users Waiting: {}", stats.users_waiting);
            println!("  Active Offers: {}", stats.active_offers);
            println!("  Active Sessions: {}", stats.active_sessions);
            std::process::exit(0);
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🚀 Practice Room Coordinator");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!(
        "   Listening: {}:{}",
        config.service.host, config.service.http_port
    );
    info!(
        "   Offer window: {}s",
        config.matchmaking.offer_window_seconds
    );
    info!(
        "   Grace window: {}s",
        config.matchmaking.grace_window_seconds
    );
    info!(
        "   Sweep interval: {}ms",
        config.matchmaking.sweep_interval_ms
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path.display());
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(&config);
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let gateway = Arc::new(WsGateway::new());
    let metrics = Arc::new(MetricsCollector::new()?);
    let coordinator = Arc::new(MatchCoordinator::new(
        gateway.clone(),
        Arc::new(StaticQuestionSelector::new()),
        config.matchmaking.clone(),
        metrics.clone(),
    ));

    let sweep_task = coordinator.clone().start_sweep_task(config.sweep_interval());

    let addr: SocketAddr = format!("{}:{}", config.service.host, config.service.http_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let state = AppState {
        coordinator,
        gateway,
        metrics,
        service_name: config.service.name.clone(),
    };

    info!("✅ Practice Room Coordinator is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(serve(state, addr, async {
        let _ = shutdown_rx.await;
    }));

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("🛑 Shutdown signal received, beginning graceful shutdown...");
            let _ = shutdown_tx.send(());
        }
        result = &mut server => {
            sweep_task.abort();
            match result {
                Ok(Ok(())) => error!("Server exited unexpectedly"),
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task failed: {}", e),
            }
            std::process::exit(1);
        }
    }
    sweep_task.abort();

    // Give in-flight connections until the configured timeout to drain
    match tokio::time::timeout(config.shutdown_timeout(), server).await {
        Ok(Ok(Ok(()))) => {
            info!("✅ Graceful shutdown completed successfully");
        }
        Ok(Ok(Err(e))) => {
            error!("Server exited with error: {}", e);
            std::process::exit(1);
        }
        Ok(Err(e)) => {
            error!("Server task failed: {}", e);
            std::process::exit(1);
        }
        Err(_) => {
            error!("⚠️  Shutdown timeout exceeded, forcing exit");
            std::process::exit(1);
        }
    }

    info!("🛑 Practice Room Coordinator stopped");
    Ok(())
}
