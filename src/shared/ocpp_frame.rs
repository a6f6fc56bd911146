//! OCPP-J message framing
//!
//! Positional JSON arrays carried in WebSocket text frames:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//!
//! Any other message type id (including CallError, `4`) is reported as
//! [`OcppFrameError::UnsupportedMessageType`] so the caller can drop the
//! frame without closing the connection.

use serde_json::Value;
use thiserror::Error;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: i64 = 2;
const MSG_TYPE_CALL_RESULT: i64 = 3;

const CALL_LEN: usize = 4;
const CALL_RESULT_LEN: usize = 3;

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult { unique_id: String, payload: Value },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw JSON text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, OcppFrameError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| OcppFrameError::MalformedEnvelope(format!("invalid JSON: {}", e)))?;

        let arr = value
            .as_array()
            .ok_or_else(|| malformed("top level is not an array"))?;

        let msg_type = arr
            .first()
            .ok_or_else(|| malformed("empty array"))?
            .as_i64()
            .ok_or_else(|| malformed("message type id is not an integer"))?;

        match msg_type {
            MSG_TYPE_CALL => Self::parse_call(arr),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(arr),
            other => Err(OcppFrameError::UnsupportedMessageType(other)),
        }
    }

    fn parse_call(arr: &[Value]) -> Result<Self, OcppFrameError> {
        expect_len(arr, CALL_LEN)?;

        let unique_id = string_field(&arr[1], "uniqueId")?;
        let action = string_field(&arr[2], "action")?;

        Ok(Self::Call {
            unique_id,
            action,
            payload: arr[3].clone(),
        })
    }

    fn parse_call_result(arr: &[Value]) -> Result<Self, OcppFrameError> {
        expect_len(arr, CALL_RESULT_LEN)?;

        let unique_id = string_field(&arr[1], "uniqueId")?;

        Ok(Self::CallResult {
            unique_id,
            payload: arr[2].clone(),
        })
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to its wire text.
    pub fn serialize(&self) -> String {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL.into()),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),

            Self::CallResult { unique_id, payload } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_RESULT.into()),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),
        };

        arr.to_string()
    }

    // ── Helpers ────────────────────────────────────────────

    /// Get the unique message ID.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. } | Self::CallResult { unique_id, .. } => unique_id,
        }
    }
}

fn malformed(reason: impl Into<String>) -> OcppFrameError {
    OcppFrameError::MalformedEnvelope(reason.into())
}

fn expect_len(arr: &[Value], expected: usize) -> Result<(), OcppFrameError> {
    if arr.len() != expected {
        return Err(malformed(format!(
            "expected {} elements, got {}",
            expected,
            arr.len()
        )));
    }
    Ok(())
}

fn string_field(value: &Value, name: &str) -> Result<String, OcppFrameError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed(format!("{} must be a string", name)))
}

// ── Errors ─────────────────────────────────────────────────────

/// Errors that can occur when parsing an OCPP-J frame.
///
/// Neither variant is fatal: the frame is dropped and the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OcppFrameError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(i64),
}
