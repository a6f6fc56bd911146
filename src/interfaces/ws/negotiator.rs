//! OCPP subprotocol negotiation
//!
//! During the WebSocket handshake the charge point advertises the OCPP
//! subprotocols it speaks via `Sec-WebSocket-Protocol`. This gateway only
//! speaks OCPP 1.6.

/// OCPP 1.6 WebSocket subprotocol
pub const OCPP16_SUBPROTOCOL: &str = "ocpp1.6";

/// Outcome of inspecting the client's `Sec-WebSocket-Protocol` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// `ocpp1.6` was offered; echo it back.
    Accepted(&'static str),
    /// The header was absent or empty.
    NotRequested,
    /// Protocols were offered, none of them ours.
    Unsupported,
}

/// Pick the subprotocol to echo from a comma-separated header value.
pub fn negotiate(requested_protocols: Option<&str>) -> Negotiation {
    let requested = requested_protocols.unwrap_or("").trim();
    if requested.is_empty() {
        return Negotiation::NotRequested;
    }

    if requested
        .split(',')
        .map(str::trim)
        .any(|p| p.eq_ignore_ascii_case(OCPP16_SUBPROTOCOL))
    {
        Negotiation::Accepted(OCPP16_SUBPROTOCOL)
    } else {
        Negotiation::Unsupported
    }
}

/// Charge point id hinted by the request path, `/ocpp/{id}` or `/{id}`.
///
/// Only used for logging; the registry identity comes from BootNotification.
pub fn path_hint(path: &str) -> Option<&str> {
    let path = path.trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_matches('/');
        return (!id.is_empty()).then_some(id);
    }

    (!path.is_empty() && !path.contains('/')).then_some(path)
}
