//! OCPP 1.6 Action handlers
//!
//! Routes OCPP 1.6 action names (parsed from `OcppFrame::Call`) to their
//! handlers. Payloads are deserialized into `rust_ocpp::v1_6` types within
//! each handler.

use serde_json::Value;
use tracing::warn;

use super::{OcppHandler, ProtocolError};

mod handle_boot_notification;

pub use handle_boot_notification::handle_boot_notification;

/// Routes a Call to its handler and returns the CallResult payload.
///
/// Only BootNotification is accepted before the charger is identified.
/// Unknown actions are reported, never answered.
pub fn v16_action_matcher(
    handler: &mut OcppHandler,
    action: &str,
    payload: &Value,
) -> Result<Value, ProtocolError> {
    match action {
        handle_boot_notification::ACTION => handle_boot_notification(handler, payload),

        other if !handler.is_identified() => Err(ProtocolError::NotIdentified {
            action: other.to_string(),
        }),

        unknown => {
            if is_cs_to_cp_action(unknown) {
                warn!(
                    connection_id = %handler.connection_id(),
                    action = unknown,
                    "Received CS→CP action from charge point (protocol error)"
                );
            }
            Err(ProtocolError::UnknownAction(unknown.to_string()))
        }
    }
}

/// Check if the action is a CS→CP action (should never arrive from a CP).
fn is_cs_to_cp_action(action: &str) -> bool {
    matches!(
        action,
        "CancelReservation"
            | "ChangeAvailability"
            | "ChangeConfiguration"
            | "ClearCache"
            | "ClearChargingProfile"
            | "GetCompositeSchedule"
            | "GetConfiguration"
            | "GetDiagnostics"
            | "GetLocalListVersion"
            | "RemoteStartTransaction"
            | "RemoteStopTransaction"
            | "ReserveNow"
            | "Reset"
            | "SendLocalList"
            | "SetChargingProfile"
            | "TriggerMessage"
            | "UnlockConnector"
            | "UpdateFirmware"
    )
}
