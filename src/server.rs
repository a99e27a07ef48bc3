//! Reusable gateway server runtime.
//!
//! [`ServerHandle`] owns the full lifecycle: metrics recorder, gateway
//! services and their background tasks, the HTTP/WebSocket listener, and
//! graceful shutdown.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::application::services::{GatewayService, SharedGatewayService};
use crate::config::AppConfig;
use crate::interfaces::http::create_router;
use crate::support::shutdown::{ShutdownCoordinator, ShutdownSignal};

// ── Options ────────────────────────────────────────────────────────

/// Options for starting the gateway.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub config: AppConfig,
}

// ── ServerHandle ───────────────────────────────────────────────────

/// Handle to a running gateway.
///
/// ```rust,no_run
/// use charge_gateway::server::{ServerHandle, ServerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handle = ServerHandle::start(ServerOptions::default()).await?;
///     handle.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ServerHandle {
    /// Session core; the protocol framing layer drives it through this.
    pub gateway: SharedGatewayService,
    /// The configuration the server was started with.
    pub config: AppConfig,

    local_addr: SocketAddr,
    shutdown: ShutdownCoordinator,
    server_task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Start the gateway:
    /// 1. Install the Prometheus recorder (once per process)
    /// 2. Build the gateway services and spawn their background tasks
    /// 3. Bind the viewer WebSocket / HTTP listener
    pub async fn start(opts: ServerOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let config = opts.config;
        info!("Starting charge gateway...");

        let prometheus = if config.metrics.enabled {
            prometheus_handle()
        } else {
            None
        };

        let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout_secs);
        let gateway = GatewayService::shared(config.gateway_settings());
        gateway.start(shutdown.signal());

        let listener = TcpListener::bind(config.server.address()).await?;
        let local_addr = listener.local_addr()?;
        info!("🔌 Viewer WebSocket listening on ws://{}/{{chargePointId}}/{{connectorId}}", local_addr);

        let router = create_router(gateway.clone(), prometheus);
        let signal = shutdown.signal();
        let server_task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.wait().await })
                .await;
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        });

        Ok(Self {
            gateway,
            config,
            local_addr,
            shutdown,
            server_task,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Wait for the listener to stop, bounded by the shutdown timeout.
    pub async fn wait(self) {
        info!("⏳ Waiting for server tasks to complete...");
        let timeout = Duration::from_secs(self.config.server.shutdown_timeout_secs);
        let task = self.server_task;

        let finished = self
            .shutdown
            .shutdown_with_cleanup(|| async move {
                match task.await {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => error!("HTTP server task panicked: {}", e),
                }
            })
            .await;
        if !finished {
            warn!("Server did not stop within {}s", timeout.as_secs());
        }

        info!("👋 Charge gateway shutdown complete");
    }

    /// Trigger shutdown and wait for completion.
    pub async fn shutdown(self) {
        info!("🛑 Shutting down charge gateway...");
        self.trigger_shutdown();
        self.wait().await;
    }

    pub fn is_running(&self) -> bool {
        !self.server_task.is_finished()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// The global recorder can be installed only once per process; a restart
/// within the same process reuses it.
fn prometheus_handle() -> Option<PrometheusHandle> {
    static PROM_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

    PROM_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("📊 Prometheus metrics recorder installed");
                Some(handle)
            }
            Err(e) => {
                error!("Failed to install Prometheus recorder: {}", e);
                None
            }
        })
        .clone()
}

/// Initialize tracing from the application config.
///
/// `RUST_LOG` wins over `logging.level` when set. Call once at startup.
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let result = match config.logging.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {}", e);
    }
}
