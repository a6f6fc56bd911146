//! v1.6 RemoteStopTransaction command

use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use tracing::info;

use super::{CommandError, CommandSender, DispatchedCommand};

pub const ACTION: &str = "RemoteStopTransaction";

pub fn remote_stop_transaction(
    command_sender: &CommandSender,
    charge_point_id: &str,
    transaction_id: i32,
) -> Result<DispatchedCommand, CommandError> {
    info!(charge_point_id, transaction_id, "v1.6 RemoteStopTransaction");

    let request = RemoteStopTransactionRequest { transaction_id };
    let payload = serde_json::to_value(&request)?;

    command_sender.send_command(charge_point_id, ACTION, payload)
}

/// Extract the `status` of a RemoteStopTransaction.conf payload.
pub fn parse_response(payload: serde_json::Value) -> Result<String, CommandError> {
    let response: RemoteStopTransactionResponse = serde_json::from_value(payload)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
    Ok(format!("{:?}", response.status))
}
