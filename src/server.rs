//! Gateway runtime
//!
//! [`ServerHandle`] owns the full lifecycle: metrics recorder, the OCPP
//! WebSocket listener, the control-plane HTTP listener, the pending-command
//! sweeper, and graceful shutdown.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Instant;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::commands::{create_command_sender, SharedCommandSender};
use crate::application::session::{SessionRegistry, SharedSessionRegistry};
use crate::config::AppConfig;
use crate::interfaces::http::create_api_router;
use crate::interfaces::ws::OcppServer;
use crate::shared::shutdown::{ShutdownCoordinator, ShutdownSignal};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// The global metrics recorder can only be installed once per process, so a
/// restart within the same process reuses the first handle.
fn prometheus_handle() -> Option<PrometheusHandle> {
    static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("📊 Prometheus metrics recorder installed");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Metrics recorder unavailable, /metrics disabled");
                None
            }
        })
        .clone()
}

async fn bind(addr: String) -> Result<TcpListener, ServerError> {
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Handle to a running gateway.
pub struct ServerHandle {
    /// Identified charge point sessions
    pub session_registry: SharedSessionRegistry,
    /// Outbound command sender and pending-correlation table
    pub command_sender: SharedCommandSender,
    /// The configuration the server was started with
    pub config: AppConfig,
    pub ws_addr: SocketAddr,
    pub api_addr: SocketAddr,

    shutdown: ShutdownCoordinator,
    ws_task: JoinHandle<()>,
    api_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bind both listeners and start serving.
    ///
    /// Bind failures are returned before anything is spawned.
    pub async fn start(config: AppConfig) -> Result<Self, ServerError> {
        info!("Starting OCPP gateway...");

        let prometheus = prometheus_handle();

        let ws_listener = bind(config.ws_address()).await?;
        let api_listener = bind(config.api_address()).await?;
        let ws_addr = ws_listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr: config.ws_address(), source })?;
        let api_addr = api_listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr: config.api_address(), source })?;

        let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout);
        let shutdown_signal = shutdown.signal();

        let session_registry = SessionRegistry::shared();
        let command_sender =
            create_command_sender(session_registry.clone(), config.ocpp.command_timeout());

        // ── Pending-command sweeper ────────────────────────────
        let sweeper_task = command_sender
            .start_timeout_sweeper(config.ocpp.sweep_interval(), shutdown_signal.clone());

        // ── OCPP WebSocket server ──────────────────────────────
        let ws_server = OcppServer::new(
            ws_listener,
            session_registry.clone(),
            command_sender.clone(),
            shutdown_signal.clone(),
        )
        .with_heartbeat_interval(config.ocpp.heartbeat_interval)
        .with_shutdown_timeout(shutdown.timeout());
        let ws_task = tokio::spawn(ws_server.run());

        // ── Control-plane HTTP server ──────────────────────────
        let router = create_api_router(
            session_registry.clone(),
            command_sender.clone(),
            prometheus,
            Instant::now(),
        );
        info!("REST API listening on http://{}", api_addr);
        info!("Swagger UI available at http://{}/docs/", api_addr);

        let api_shutdown = shutdown_signal.clone();
        let api_task = tokio::spawn(async move {
            let served = axum::serve(api_listener, router)
                .with_graceful_shutdown(async move {
                    api_shutdown.wait().await;
                    info!("🛑 REST API server received shutdown signal");
                })
                .await;
            if let Err(e) = served {
                error!("REST API server error: {}", e);
            }
        });

        info!("🚀 All servers started.");

        Ok(Self {
            session_registry,
            command_sender,
            config,
            ws_addr,
            api_addr,
            shutdown,
            ws_task,
            api_task,
            sweeper_task,
        })
    }

    /// Get a cloneable shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    /// Trigger graceful shutdown without waiting.
    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Wait for every server task to stop after shutdown has been triggered.
    pub async fn wait(self) {
        info!("⏳ Waiting for server tasks to complete...");

        for (name, task) in [
            ("WebSocket server", self.ws_task),
            ("REST API server", self.api_task),
            ("Timeout sweeper", self.sweeper_task),
        ] {
            match task.await {
                Ok(()) => info!("{} stopped", name),
                Err(e) => error!("{} task failed: {}", name, e),
            }
        }

        let abandoned = self.command_sender.pending_count();
        if abandoned > 0 {
            warn!(abandoned, "Pending commands dropped at shutdown");
        }
        info!("👋 OCPP gateway shutdown complete");
    }

    /// Trigger shutdown and wait for completion.
    pub async fn shutdown(self) {
        info!("🛑 Shutting down OCPP gateway...");
        self.trigger_shutdown();
        self.wait().await;
    }

    /// Whether any server task is still running.
    pub fn is_running(&self) -> bool {
        !self.ws_task.is_finished() || !self.api_task.is_finished()
    }
}

/// Initialize tracing from the logging config. Call once at startup.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.logging.format.to_lowercase().as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing already initialised: {}", e);
    }
}
