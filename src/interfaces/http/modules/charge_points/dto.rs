use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::application::Connection;
use crate::domain::ChargePointIdentity;

/// A charge point currently bound to a live connection
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedChargePointDto {
    pub charge_point_id: String,
    pub connection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl ConnectedChargePointDto {
    pub fn from_session(identity: &ChargePointIdentity, connection: &Connection) -> Self {
        Self {
            charge_point_id: identity.to_string(),
            connection_id: connection.id().to_string(),
            remote_addr: connection.remote_addr().map(|a| a.to_string()),
            connected_at: connection.connected_at(),
        }
    }
}
