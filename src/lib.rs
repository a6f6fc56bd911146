//! # OCPP Gateway
//!
//! OCPP 1.6 gateway between EV charge points and an operator control plane.
//!
//! ## Architecture
//!
//! The project follows Clean Architecture principles:
//!
//! - **domain**: charge point identity
//! - **application**: session registry, per-connection protocol handler,
//!   outbound command sender with correlation tracking
//! - **interfaces**: OCPP WebSocket server and the control-plane HTTP API
//! - **shared**: OCPP-J framing and shutdown signalling
//! - **config** / **server**: TOML configuration and the runtime handle

pub mod application;
pub mod config;
pub mod domain;
pub mod interfaces;
pub mod server;
pub mod shared;

pub use config::{default_config_path, AppConfig};

pub use application::{
    CommandError, CommandSender, OcppHandler, ProtocolError, SessionRegistry,
    SharedCommandSender, SharedSessionRegistry,
};
pub use domain::ChargePointIdentity;
pub use interfaces::http::create_api_router;
pub use interfaces::ws::OcppServer;
pub use server::{init_tracing, ServerError, ServerHandle};
pub use shared::{OcppFrame, OcppFrameError, ShutdownSignal};
