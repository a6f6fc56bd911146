pub mod commands;
pub mod handlers;
pub mod session;

// Re-export key types for convenience
pub use commands::{
    create_command_sender, remote_start_transaction, remote_stop_transaction, CommandError,
    CommandSender, DispatchedCommand, SharedCommandSender,
};
pub use handlers::{ConnectionState, OcppHandler, ProtocolError, TransportEvent};
pub use session::{Connection, ConnectionId, SessionRegistry, SharedSessionRegistry};
