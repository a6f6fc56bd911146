//! WebSocket interfaces
//!
//! - `ocpp_server`: OCPP 1.6 WebSocket accept loop
//! - `negotiator`: subprotocol negotiation and path hints

pub mod negotiator;
pub mod ocpp_server;

pub use ocpp_server::OcppServer;
