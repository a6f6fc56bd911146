pub mod connection;
pub mod registry;

pub use connection::{Connection, ConnectionClosed, ConnectionId};
pub use registry::{RegisterResult, SessionRegistry, SharedSessionRegistry};
