//! Remote command module: RemoteStartTransaction / RemoteStopTransaction

pub mod dto;
pub mod handlers;

pub use dto::*;
pub use handlers::*;
