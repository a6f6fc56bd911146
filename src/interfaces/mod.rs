//! Outer adapters: the charger-facing WebSocket server and the operator-facing HTTP API

pub mod http;
pub mod ws;
