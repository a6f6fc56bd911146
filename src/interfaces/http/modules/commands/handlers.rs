//! Remote command API handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use tracing::{info, warn};

use super::dto::{CommandResponse, StartRequest, StopRequest, WaitQuery};
use crate::application::commands::{remote_start, remote_stop};
use crate::application::{CommandError, DispatchedCommand, SharedCommandSender};
use crate::interfaces::http::common::{ApiResponse, ValidatedJson};

/// Command handler state
#[derive(Clone)]
pub struct CommandAppState {
    pub command_sender: SharedCommandSender,
}

type CommandResult =
    Result<Json<ApiResponse<CommandResponse>>, (StatusCode, Json<ApiResponse<CommandResponse>>)>;

#[utoipa::path(
    post,
    path = "/start",
    tag = "Commands",
    params(WaitQuery),
    request_body = StartRequest,
    responses(
        (status = 200, description = "Sent, or answered when waiting", body = ApiResponse<CommandResponse>),
        (status = 400, description = "Missing or malformed field"),
        (status = 404, description = "Charge point not connected"),
        (status = 422, description = "Field failed validation"),
        (status = 504, description = "No answer within the command timeout")
    )
)]
pub async fn start_transaction(
    State(state): State<CommandAppState>,
    Query(query): Query<WaitQuery>,
    ValidatedJson(request): ValidatedJson<StartRequest>,
) -> CommandResult {
    info!(
        charge_point_id = request.charge_point_id.as_str(),
        connector_id = request.connector_id,
        wait = query.wait,
        "Remote start requested"
    );

    let dispatched = remote_start::remote_start_transaction(
        &state.command_sender,
        &request.charge_point_id,
        request.connector_id,
        &request.id_tag,
    );

    respond(
        dispatched,
        &request.charge_point_id,
        remote_start::ACTION,
        query.wait,
        remote_start::parse_response,
    )
    .await
}

#[utoipa::path(
    post,
    path = "/stop",
    tag = "Commands",
    params(WaitQuery),
    request_body = StopRequest,
    responses(
        (status = 200, description = "Sent, or answered when waiting", body = ApiResponse<CommandResponse>),
        (status = 400, description = "Missing or malformed field"),
        (status = 404, description = "Charge point not connected"),
        (status = 422, description = "Field failed validation"),
        (status = 504, description = "No answer within the command timeout")
    )
)]
pub async fn stop_transaction(
    State(state): State<CommandAppState>,
    Query(query): Query<WaitQuery>,
    ValidatedJson(request): ValidatedJson<StopRequest>,
) -> CommandResult {
    info!(
        charge_point_id = request.charge_point_id.as_str(),
        transaction_id = request.transaction_id,
        wait = query.wait,
        "Remote stop requested"
    );

    let dispatched = remote_stop::remote_stop_transaction(
        &state.command_sender,
        &request.charge_point_id,
        request.transaction_id,
    );

    respond(
        dispatched,
        &request.charge_point_id,
        remote_stop::ACTION,
        query.wait,
        remote_stop::parse_response,
    )
    .await
}

/// Turn a dispatch attempt into the HTTP answer, optionally waiting for the
/// charger's CallResult.
async fn respond(
    dispatched: Result<DispatchedCommand, CommandError>,
    charge_point_id: &str,
    action: &str,
    wait: bool,
    parse: fn(Value) -> Result<String, CommandError>,
) -> CommandResult {
    let dispatched = dispatched.map_err(|e| failure(charge_point_id, action, e))?;

    if !wait {
        return Ok(Json(ApiResponse::success(CommandResponse::sent(
            dispatched.unique_id,
            action,
            charge_point_id,
        ))));
    }

    let unique_id = dispatched.unique_id.clone();
    let status = dispatched
        .response()
        .await
        .and_then(parse)
        .map_err(|e| failure(charge_point_id, action, e))?;

    Ok(Json(ApiResponse::success(CommandResponse::answered(
        unique_id, status, action,
    ))))
}

fn failure(
    charge_point_id: &str,
    action: &str,
    error: CommandError,
) -> (StatusCode, Json<ApiResponse<CommandResponse>>) {
    let status = match &error {
        CommandError::NotConnected(_) => StatusCode::NOT_FOUND,
        CommandError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(charge_point_id, action, error = %error, status = status.as_u16(), "Command failed");
    (status, Json(ApiResponse::error(error.to_string())))
}
