//! BootNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use serde_json::Value;
use tracing::{error, info};

use crate::application::handlers::{OcppHandler, ProtocolError};
use crate::domain::ChargePointIdentity;

pub const ACTION: &str = "BootNotification";

pub fn handle_boot_notification(
    handler: &mut OcppHandler,
    payload: &Value,
) -> Result<Value, ProtocolError> {
    let request: BootNotificationRequest =
        serde_json::from_value(payload.clone()).map_err(|e| {
            error!(
                connection_id = %handler.connection_id(),
                error = %e,
                "Failed to deserialize BootNotificationRequest"
            );
            ProtocolError::InvalidPayload {
                action: ACTION.to_string(),
                reason: e.to_string(),
            }
        })?;

    let identity = ChargePointIdentity::from_boot_notification(&request).ok_or_else(|| {
        ProtocolError::InvalidPayload {
            action: ACTION.to_string(),
            reason: "neither chargePointSerialNumber nor chargePointModel names the charger"
                .to_string(),
        }
    })?;

    info!(
        charge_point_id = identity.as_str(),
        connection_id = %handler.connection_id(),
        vendor = request.charge_point_vendor.as_str(),
        model = request.charge_point_model.as_str(),
        serial_number = request.charge_point_serial_number.as_deref().unwrap_or("-"),
        "BootNotification"
    );

    handler.identify(identity);

    let response = BootNotificationResponse {
        current_time: Utc::now(),
        interval: handler.heartbeat_interval(),
        status: RegistrationStatus::Accepted,
    };

    Ok(serde_json::to_value(&response)?)
}
