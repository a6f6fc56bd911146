//! Protocol-level dispatch errors
//!
//! Every variant means "drop this frame, log it, keep the connection open".

use thiserror::Error;

use crate::shared::ocpp_frame::OcppFrameError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Frame(#[from] OcppFrameError),

    /// Action name this gateway does not handle.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// A Call other than BootNotification arrived before the handshake.
    #[error("{action} received before BootNotification")]
    NotIdentified { action: String },

    /// CallResult that matches no pending command.
    #[error("Unsolicited CallResult {unique_id}")]
    UnsolicitedResult { unique_id: String },

    #[error("Invalid {action} payload: {reason}")]
    InvalidPayload { action: String, reason: String },

    #[error("Failed to serialize response: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Frame received after teardown.
    #[error("Connection already closed")]
    Closed,
}

impl ProtocolError {
    /// Short, stable label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Frame(OcppFrameError::MalformedEnvelope(_)) => "malformed_envelope",
            Self::Frame(OcppFrameError::UnsupportedMessageType(_)) => "unsupported_message_type",
            Self::UnknownAction(_) => "unknown_action",
            Self::NotIdentified { .. } => "not_identified",
            Self::UnsolicitedResult { .. } => "unsolicited_result",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::Serialization(_) => "serialization",
            Self::Closed => "closed",
        }
    }
}
