//! v1.6 RemoteStartTransaction command

use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use tracing::info;

use super::{CommandError, CommandSender, DispatchedCommand};

pub const ACTION: &str = "RemoteStartTransaction";

/// Queue a RemoteStartTransaction on `connector_id` authorised by `id_tag`.
pub fn remote_start_transaction(
    command_sender: &CommandSender,
    charge_point_id: &str,
    connector_id: u32,
    id_tag: &str,
) -> Result<DispatchedCommand, CommandError> {
    info!(charge_point_id, connector_id, id_tag, "v1.6 RemoteStartTransaction");

    let request = RemoteStartTransactionRequest {
        connector_id: Some(connector_id),
        id_tag: id_tag.to_string(),
        charging_profile: None,
    };
    let payload = serde_json::to_value(&request)?;

    command_sender.send_command(charge_point_id, ACTION, payload)
}

/// Extract the `status` of a RemoteStartTransaction.conf payload.
pub fn parse_response(payload: serde_json::Value) -> Result<String, CommandError> {
    let response: RemoteStartTransactionResponse = serde_json::from_value(payload)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
    Ok(format!("{:?}", response.status))
}
