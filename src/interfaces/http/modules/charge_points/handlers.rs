//! Charge point API handlers

use axum::{extract::State, Json};

use super::dto::ConnectedChargePointDto;
use crate::application::SharedSessionRegistry;
use crate::interfaces::http::common::ApiResponse;

#[derive(Clone)]
pub struct ChargePointsState {
    pub session_registry: SharedSessionRegistry,
}

#[utoipa::path(
    get,
    path = "/charge-points",
    tag = "Charge Points",
    responses(
        (status = 200, description = "Identified charge points", body = ApiResponse<Vec<ConnectedChargePointDto>>)
    )
)]
pub async fn list_connected(
    State(state): State<ChargePointsState>,
) -> Json<ApiResponse<Vec<ConnectedChargePointDto>>> {
    let sessions = state
        .session_registry
        .snapshot()
        .iter()
        .map(|(identity, connection)| ConnectedChargePointDto::from_session(identity, connection))
        .collect();
    Json(ApiResponse::success(sessions))
}
