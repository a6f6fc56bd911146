//! OCPP Gateway: CLI server
//!
//! ```sh
//! # Run with default config (~/.config/ocpp-gateway/config.toml)
//! ocpp-gateway
//!
//! # Custom config path
//! ocpp-gateway --config /etc/ocpp-gateway/config.toml
//!
//! # Override ports
//! ocpp-gateway --api-port 8080 --ws-port 9000
//!
//! # Validate config without starting
//! ocpp-gateway --check
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use ocpp_gateway::config::{default_config_path, AppConfig, CONFIG_PATH_ENV};
use ocpp_gateway::server::{init_tracing, ServerHandle};

/// OCPP 1.6 gateway for EV charge points.
#[derive(Parser, Debug)]
#[command(
    name = "ocpp-gateway",
    version,
    about = "OCPP 1.6 gateway between charge points and an operator control plane",
    long_about = "Accepts OCPP 1.6 charge point WebSocket connections and exposes an HTTP \
                  control plane for RemoteStartTransaction / RemoteStopTransaction.\n\n\
                  Default config: ~/.config/ocpp-gateway/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Override the control-plane HTTP listen port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the OCPP WebSocket listen port.
    #[arg(long)]
    ws_port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(port) = self.api_port {
            config.server.api_port = port;
        }
        if let Some(port) = self.ws_port {
            config.server.ws_port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    let (mut config, load_error) = match AppConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };
    cli.apply_overrides(&mut config);

    if cli.check {
        return match load_error {
            Some(e) => {
                eprintln!("❌ {}", e);
                ExitCode::FAILURE
            }
            None => {
                println!("✅ Configuration is valid");
                println!("   Config file : {}", config_path.display());
                println!("   API address : {}", config.api_address());
                println!("   WS address  : {}", config.ws_address());
                println!("   Cmd timeout : {}s", config.ocpp.command_timeout().as_secs());
                println!("   Log level   : {}", config.logging.level);
                ExitCode::SUCCESS
            }
        };
    }

    init_tracing(&config);
    match load_error {
        Some(e) => {
            error!("{}", e);
            error!("Using default configuration.");
        }
        None => info!("Configuration loaded from {}", config_path.display()),
    }

    let handle = match ServerHandle::start(config).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    handle.install_signal_handler();
    info!("🚀 Press Ctrl+C to shutdown gracefully.");

    handle.shutdown_signal().wait().await;
    handle.wait().await;

    ExitCode::SUCCESS
}
