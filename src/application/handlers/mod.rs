//! OCPP message handlers

mod error;
mod ocpp_handler;
mod ocpp_v16;

pub use error::ProtocolError;
pub use ocpp_handler::{ConnectionState, OcppHandler, TransportEvent, DEFAULT_HEARTBEAT_INTERVAL};
pub use ocpp_v16::v16_action_matcher;
