//! Charge gateway CLI server
//!
//! Headless session core suitable for deployment as a systemd service,
//! Docker container, or standalone process.
//!
//! ```sh
//! # Run with default config (~/.config/charge-gateway/config.toml)
//! charge-gateway
//!
//! # Custom config path
//! charge-gateway --config /etc/charge-gateway/config.toml
//!
//! # Override listener
//! charge-gateway --host 127.0.0.1 --port 9000
//!
//! # Validate config without starting
//! charge-gateway --check
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use charge_gateway::config::AppConfig;
use charge_gateway::server::{init_tracing, ServerHandle, ServerOptions};

/// Charge gateway: live charge-point sessions and viewer streams.
#[derive(Parser, Debug)]
#[command(
    name = "charge-gateway",
    version,
    about = "Charge-point session gateway with live viewer streams",
    long_about = "Tracks connected charging stations, checks their liveness and \
                  streams connector status and telemetry to WebSocket viewers.\n\n\
                  Default config: ~/.config/charge-gateway/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.unwrap_or_else(charge_gateway::default_config_path);

    let mut config = match AppConfig::load(&config_path) {
        Ok(mut cfg) => {
            if let Some(ref level) = cli.log_level {
                cfg.logging.level = level.clone();
            }
            init_tracing(&cfg);
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(
                    cli.log_level.as_deref().unwrap_or("info"),
                ))
                .init();
            error!("Failed to load config: {}", e);
            error!("Using default configuration.");
            AppConfig::default()
        }
    };

    // ── Apply CLI overrides ────────────────────────────────────
    if let Some(host) = cli.host {
        info!("CLI override: host = {}", host);
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        info!("CLI override: port = {}", port);
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // ── Config validation mode ─────────────────────────────────
    if cli.check {
        println!("✅ Configuration is valid");
        println!("   Config file        : {}", config_path.display());
        println!("   Listen address     : {}", config.server.address());
        println!("   Heartbeat timeout  : {}s", config.liveness.heartbeat_timeout_secs);
        println!("   Connection timeout : {}s", config.liveness.connection_timeout_secs);
        println!("   Probe retries      : {}", config.liveness.max_offline_retries);
        println!("   Max connector id   : {}", config.registry.max_connector_id);
        println!("   Metrics            : {}", if config.metrics.enabled { "on" } else { "off" });
        println!("   Log level          : {}", config.logging.level);
        return Ok(());
    }

    // ── Start server ───────────────────────────────────────────
    let handle = ServerHandle::start(ServerOptions { config }).await?;

    handle.install_signal_handler();

    info!("🚀 Press Ctrl+C to shutdown gracefully.");

    handle.shutdown_signal().wait().await;
    handle.wait().await;

    Ok(())
}
