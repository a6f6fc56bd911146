//! Charge point identity

use std::borrow::Borrow;
use std::fmt;

use rust_ocpp::v1_6::messages::boot_notification::BootNotificationRequest;
use serde::{Deserialize, Serialize};

/// Stable token naming a physical charger.
///
/// Derived from BootNotification metadata: the serial number when the
/// charger reports a non-blank one, otherwise the model name. The protocol
/// does not guarantee global uniqueness; collisions are resolved by the
/// session registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChargePointIdentity(String);

impl ChargePointIdentity {
    /// Build an identity from a raw token. Blank tokens are rejected.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Derive the identity announced by a BootNotification.
    pub fn from_boot_notification(request: &BootNotificationRequest) -> Option<Self> {
        request
            .charge_point_serial_number
            .as_deref()
            .and_then(Self::new)
            .or_else(|| Self::new(&request.charge_point_model))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChargePointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChargePointIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChargePointIdentity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn boot(payload: serde_json::Value) -> BootNotificationRequest {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn prefers_serial_number() {
        let request = boot(json!({
            "chargePointModel": "X1",
            "chargePointVendor": "Acme",
            "chargePointSerialNumber": "SN42"
        }));
        let identity = ChargePointIdentity::from_boot_notification(&request).unwrap();
        assert_eq!(identity.as_str(), "SN42");
    }

    #[test]
    fn falls_back_to_model() {
        let request = boot(json!({
            "chargePointModel": "X1",
            "chargePointVendor": "Acme"
        }));
        let identity = ChargePointIdentity::from_boot_notification(&request).unwrap();
        assert_eq!(identity.as_str(), "X1");
    }

    #[test]
    fn blank_serial_counts_as_absent() {
        let request = boot(json!({
            "chargePointModel": "X1",
            "chargePointVendor": "Acme",
            "chargePointSerialNumber": "   "
        }));
        let identity = ChargePointIdentity::from_boot_notification(&request).unwrap();
        assert_eq!(identity.as_str(), "X1");
    }

    #[test]
    fn blank_tokens_are_rejected() {
        assert!(ChargePointIdentity::new("").is_none());
        assert!(ChargePointIdentity::new(" \t").is_none());
        assert_eq!(ChargePointIdentity::new(" CP1 ").unwrap().as_str(), "CP1");
    }
}
