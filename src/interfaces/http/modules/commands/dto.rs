//! Command DTOs

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// `POST /start` body
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub charge_point_id: String,
    pub connector_id: u32,
    #[validate(length(min = 1, max = 20, message = "must be 1-20 characters"))]
    pub id_tag: String,
}

/// `POST /stop` body
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub charge_point_id: String,
    pub transaction_id: i32,
}

/// Optional `?wait=true`: block until the charger answers or the command times out.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WaitQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// Correlation id of the Call sent to the charger
    pub unique_id: String,
    /// `Sent`, or the charger's `Accepted` / `Rejected` when waiting
    pub status: String,
    pub message: String,
}

impl CommandResponse {
    pub fn sent(unique_id: impl Into<String>, action: &str, charge_point_id: &str) -> Self {
        Self {
            unique_id: unique_id.into(),
            status: "Sent".to_string(),
            message: format!("{} sent to {}", action, charge_point_id),
        }
    }

    pub fn answered(unique_id: impl Into<String>, status: impl Into<String>, action: &str) -> Self {
        let status = status.into();
        Self {
            message: format!("{} {} by charge point", action, status.to_lowercase()),
            unique_id: unique_id.into(),
            status,
        }
    }
}
