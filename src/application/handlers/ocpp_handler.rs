//! Per-connection OCPP 1.6 message handler
//!
//! One [`OcppHandler`] owns the protocol state of a single charge point
//! connection:
//!
//! ```text
//! Unidentified ──BootNotification──► Identified ──close──► Closed
//!       └──────────────────close──────────────────────────────┘
//! ```
//!
//! Frames are handled strictly in arrival order. Nothing it does is fatal:
//! a bad frame is logged and dropped, and teardown runs exactly once.

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::application::commands::SharedCommandSender;
use crate::application::session::{Connection, ConnectionId, SharedSessionRegistry};
use crate::domain::ChargePointIdentity;
use crate::shared::ocpp_frame::OcppFrame;

use super::ocpp_v16::v16_action_matcher;
use super::ProtocolError;

/// Heartbeat interval returned in BootNotification.conf when none is configured.
pub const DEFAULT_HEARTBEAT_INTERVAL: u32 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unidentified,
    Identified(ChargePointIdentity),
    Closed,
}

/// Transport-neutral input to the handler loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the charge point.
    Text(String),
    /// The peer closed the connection.
    Closed(Option<String>),
    /// The socket failed; treated like a close.
    Error(String),
}

/// Handler for one charge point connection
pub struct OcppHandler {
    connection: Connection,
    state: ConnectionState,
    session_registry: SharedSessionRegistry,
    command_sender: SharedCommandSender,
    heartbeat_interval: u32,
}

impl OcppHandler {
    pub fn new(
        connection: Connection,
        session_registry: SharedSessionRegistry,
        command_sender: SharedCommandSender,
    ) -> Self {
        Self {
            connection,
            state: ConnectionState::Unidentified,
            session_registry,
            command_sender,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, seconds: u32) -> Self {
        self.heartbeat_interval = seconds;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn heartbeat_interval(&self) -> u32 {
        self.heartbeat_interval
    }

    pub fn is_identified(&self) -> bool {
        matches!(self.state, ConnectionState::Identified(_))
    }

    pub fn identity(&self) -> Option<&ChargePointIdentity> {
        match &self.state {
            ConnectionState::Identified(identity) => Some(identity),
            _ => None,
        }
    }

    /// Drive the handler until the transport closes, then tear down.
    pub async fn run<S>(&mut self, events: S)
    where
        S: Stream<Item = TransportEvent>,
    {
        let mut events = std::pin::pin!(events);

        while let Some(event) = events.next().await {
            match event {
                TransportEvent::Text(text) => {
                    if !self.process(&text) {
                        break;
                    }
                }
                TransportEvent::Closed(reason) => {
                    info!(
                        connection_id = %self.connection_id(),
                        reason = reason.as_deref().unwrap_or("-"),
                        "Close frame received"
                    );
                    break;
                }
                TransportEvent::Error(e) => {
                    warn!(connection_id = %self.connection_id(), error = %e, "WebSocket error");
                    break;
                }
            }
        }

        self.close();
    }

    /// Handle one frame and queue the reply, if any.
    /// Returns `false` once the connection can no longer be written to.
    fn process(&mut self, text: &str) -> bool {
        debug!(connection_id = %self.connection_id(), "<- {}", text);
        metrics::counter!("ocpp_frames_received_total").increment(1);

        match self.handle(text) {
            Ok(Some(reply)) => {
                if self.connection.send(reply).is_err() {
                    warn!(
                        connection_id = %self.connection_id(),
                        "Failed to queue response, connection writer is gone"
                    );
                    return false;
                }
            }
            Ok(None) => {}
            Err(e) => {
                metrics::counter!("ocpp_frames_dropped_total", "reason" => e.reason()).increment(1);
                warn!(
                    connection_id = %self.connection_id(),
                    charge_point_id = self.identity().map(ChargePointIdentity::as_str).unwrap_or("-"),
                    error = %e,
                    "Dropped frame"
                );
            }
        }
        true
    }

    /// Parse and dispatch a raw frame.
    ///
    /// Returns the serialized CallResult to send back, `None` when the frame
    /// needs no reply, or the reason the frame was dropped.
    pub fn handle(&mut self, text: &str) -> Result<Option<String>, ProtocolError> {
        if self.state == ConnectionState::Closed {
            return Err(ProtocolError::Closed);
        }

        match OcppFrame::parse(text)? {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => self.handle_call(unique_id, &action, &payload).map(Some),

            OcppFrame::CallResult { unique_id, payload } => {
                self.handle_call_result(unique_id, payload)?;
                Ok(None)
            }
        }
    }

    fn handle_call(
        &mut self,
        unique_id: String,
        action: &str,
        payload: &Value,
    ) -> Result<String, ProtocolError> {
        info!(
            connection_id = %self.connection_id(),
            message_id = unique_id.as_str(),
            action,
            "Received Call"
        );

        let response_payload = v16_action_matcher(self, action, payload)?;

        let response = OcppFrame::CallResult {
            unique_id,
            payload: response_payload,
        };
        Ok(response.serialize())
    }

    fn handle_call_result(&mut self, unique_id: String, payload: Value) -> Result<(), ProtocolError> {
        if !self.is_identified() {
            return Err(ProtocolError::NotIdentified {
                action: "CallResult".to_string(),
            });
        }

        if self
            .command_sender
            .handle_response(self.connection_id(), &unique_id, payload)
        {
            Ok(())
        } else {
            Err(ProtocolError::UnsolicitedResult { unique_id })
        }
    }

    /// Bind this connection to `identity` in the session registry.
    ///
    /// A repeated BootNotification announcing a different identity first
    /// releases the mapping this connection held under the old one.
    pub(crate) fn identify(&mut self, identity: ChargePointIdentity) {
        if let ConnectionState::Identified(previous) = &self.state {
            if *previous != identity {
                info!(
                    connection_id = %self.connection_id(),
                    previous = previous.as_str(),
                    charge_point_id = identity.as_str(),
                    "Charge point re-identified"
                );
                self.session_registry
                    .unregister_if_owned(previous, self.connection.id());
            }
        }

        self.session_registry
            .register(&identity, self.connection.clone());
        self.state = ConnectionState::Identified(identity);
    }

    /// Tear down the connection. Idempotent: only the first call has any
    /// effect, and it returns `true`.
    pub fn close(&mut self) -> bool {
        match std::mem::replace(&mut self.state, ConnectionState::Closed) {
            ConnectionState::Closed => false,
            ConnectionState::Unidentified => {
                info!(connection_id = %self.connection_id(), "Unidentified connection closed");
                true
            }
            ConnectionState::Identified(identity) => {
                self.session_registry.remove_by_connection(self.connection.id());
                info!(
                    charge_point_id = identity.as_str(),
                    connection_id = %self.connection_id(),
                    "Disconnected"
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::{remote_start_transaction, CommandSender};
    use crate::application::session::SessionRegistry;
    use crate::shared::ocpp_frame::OcppFrameError;
    use futures_util::stream;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const BOOT: &str = r#"[2,"1","BootNotification",{"chargePointModel":"X1","chargePointVendor":"Acme","chargePointSerialNumber":"SN42"}]"#;

    struct Harness {
        registry: SharedSessionRegistry,
        sender: SharedCommandSender,
    }

    impl Harness {
        fn new() -> Self {
            let registry = SessionRegistry::shared();
            let sender = Arc::new(CommandSender::new(registry.clone()));
            Self { registry, sender }
        }

        fn connect(&self, id: u64) -> (OcppHandler, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connection = Connection::new(ConnectionId(id), tx, None);
            let handler = OcppHandler::new(connection, self.registry.clone(), self.sender.clone());
            (handler, rx)
        }
    }

    fn reply(handler: &mut OcppHandler, text: &str) -> OcppFrame {
        let raw = handler.handle(text).unwrap().expect("a reply");
        OcppFrame::parse(&raw).unwrap()
    }

    #[test]
    fn boot_notification_identifies_and_replies() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);
        assert_eq!(handler.state(), &ConnectionState::Unidentified);

        let OcppFrame::CallResult { unique_id, payload } = reply(&mut handler, BOOT) else {
            panic!("expected CallResult");
        };
        assert_eq!(unique_id, "1");
        assert_eq!(payload["status"], "Accepted");
        assert_eq!(payload["interval"], 300);
        let current_time = payload["currentTime"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(current_time).is_ok());

        assert_eq!(
            handler.state(),
            &ConnectionState::Identified(ChargePointIdentity::new("SN42").unwrap())
        );
        assert_eq!(h.registry.lookup("SN42").map(|c| c.id()), Some(ConnectionId(1)));
    }

    #[test]
    fn configured_heartbeat_interval_is_returned() {
        let h = Harness::new();
        let (handler, _rx) = h.connect(1);
        let mut handler = handler.with_heartbeat_interval(60);

        let OcppFrame::CallResult { payload, .. } = reply(&mut handler, BOOT) else {
            panic!("expected CallResult");
        };
        assert_eq!(payload["interval"], 60);
    }

    #[test]
    fn other_actions_before_boot_are_dropped() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);

        let err = handler.handle(r#"[2,"9","Heartbeat",{}]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::NotIdentified { action } if action == "Heartbeat"));
        assert_eq!(handler.state(), &ConnectionState::Unidentified);
        assert_eq!(h.registry.count(), 0);
    }

    #[test]
    fn unknown_actions_after_boot_are_dropped() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);
        reply(&mut handler, BOOT);

        let err = handler.handle(r#"[2,"2","Heartbeat",{}]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownAction(a) if a == "Heartbeat"));
        assert!(handler.is_identified());
    }

    #[test]
    fn malformed_and_unsupported_frames_keep_state() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);
        reply(&mut handler, BOOT);

        assert!(matches!(
            handler.handle("not json"),
            Err(ProtocolError::Frame(OcppFrameError::MalformedEnvelope(_)))
        ));
        assert!(matches!(
            handler.handle(r#"[4,"1","GenericError","boom",{}]"#),
            Err(ProtocolError::Frame(OcppFrameError::UnsupportedMessageType(4)))
        ));
        assert!(handler.is_identified());
    }

    #[test]
    fn invalid_boot_payload_is_dropped() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);

        let err = handler
            .handle(r#"[2,"1","BootNotification",{"chargePointVendor":"Acme"}]"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
        assert_eq!(handler.state(), &ConnectionState::Unidentified);
    }

    #[test]
    fn identity_falls_back_to_model() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);
        reply(
            &mut handler,
            r#"[2,"1","BootNotification",{"chargePointModel":"X1","chargePointVendor":"Acme"}]"#,
        );
        assert!(h.registry.is_connected("X1"));
    }

    #[test]
    fn call_result_resolves_pending_command() {
        let h = Harness::new();
        let (mut handler, mut rx) = h.connect(1);
        reply(&mut handler, BOOT);

        let dispatched = remote_start_transaction(&h.sender, "SN42", 1, "TAG1").unwrap();
        let sent = OcppFrame::parse(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(sent.unique_id(), dispatched.unique_id);

        // Unmatched results leave it pending
        for text in [r#"[3,"nope",{}]"#, r#"[3,"1",{}]"#] {
            assert!(matches!(
                handler.handle(text),
                Err(ProtocolError::UnsolicitedResult { .. })
            ));
        }
        assert!(h.sender.is_pending(&dispatched.unique_id));

        let result = format!(r#"[3,"{}",{{"status":"Accepted"}}]"#, dispatched.unique_id);
        assert_eq!(handler.handle(&result).unwrap(), None);
        assert!(!h.sender.is_pending(&dispatched.unique_id));
    }

    #[test]
    fn call_result_before_boot_is_dropped() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);
        assert!(matches!(
            handler.handle(r#"[3,"CS-1",{}]"#),
            Err(ProtocolError::NotIdentified { .. })
        ));
    }

    #[test]
    fn result_from_another_connection_does_not_resolve() {
        let h = Harness::new();
        let (mut first, _rx1) = h.connect(1);
        let (mut second, _rx2) = h.connect(2);
        reply(&mut first, BOOT);
        reply(
            &mut second,
            r#"[2,"1","BootNotification",{"chargePointModel":"Y","chargePointVendor":"Acme","chargePointSerialNumber":"OTHER"}]"#,
        );

        let dispatched = remote_start_transaction(&h.sender, "SN42", 1, "TAG1").unwrap();
        let result = format!(r#"[3,"{}",{{"status":"Accepted"}}]"#, dispatched.unique_id);
        assert!(second.handle(&result).is_err());
        assert!(h.sender.is_pending(&dispatched.unique_id));
        assert!(first.handle(&result).is_ok());
    }

    #[test]
    fn close_unregisters_once() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);
        reply(&mut handler, BOOT);

        assert!(handler.close());
        assert!(!handler.close());
        assert_eq!(handler.state(), &ConnectionState::Closed);
        assert!(h.registry.lookup("SN42").is_none());
        assert!(matches!(handler.handle(BOOT), Err(ProtocolError::Closed)));
    }

    #[test]
    fn duplicate_identity_last_boot_wins() {
        let h = Harness::new();
        let (mut first, mut first_rx) = h.connect(1);
        let (mut second, _rx2) = h.connect(2);

        reply(&mut first, BOOT);
        reply(&mut second, BOOT);

        assert_eq!(h.registry.count(), 1);
        assert_eq!(h.registry.lookup("SN42").map(|c| c.id()), Some(ConnectionId(2)));

        // The evicted connection stays open and keeps its own state
        assert!(first.is_identified());
        assert!(first_rx.try_recv().is_err());

        // Its close must not drop the successor's mapping
        assert!(first.close());
        assert_eq!(h.registry.lookup("SN42").map(|c| c.id()), Some(ConnectionId(2)));
    }

    #[test]
    fn re_boot_with_new_identity_moves_mapping() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);
        reply(&mut handler, BOOT);
        reply(
            &mut handler,
            r#"[2,"2","BootNotification",{"chargePointModel":"X1","chargePointVendor":"Acme","chargePointSerialNumber":"SN43"}]"#,
        );

        assert!(!h.registry.is_connected("SN42"));
        assert!(h.registry.is_connected("SN43"));
        assert_eq!(h.registry.count(), 1);
    }

    #[tokio::test]
    async fn run_replies_in_order_and_tears_down() {
        let h = Harness::new();
        let (mut handler, mut rx) = h.connect(1);

        let events = stream::iter(vec![
            TransportEvent::Text("garbage".into()),
            TransportEvent::Text(BOOT.into()),
            TransportEvent::Text(BOOT.replace(r#""1""#, r#""2""#)),
            TransportEvent::Closed(None),
            TransportEvent::Text(BOOT.replace(r#""1""#, r#""3""#)),
        ]);
        handler.run(events).await;

        let ids: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|raw| OcppFrame::parse(&raw).unwrap().unique_id().to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(handler.state(), &ConnectionState::Closed);
        assert!(h.registry.lookup("SN42").is_none());

        // Teardown already ran; a second close is a no-op
        assert!(!handler.close());
    }

    #[tokio::test]
    async fn transport_error_counts_as_close() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);

        handler
            .run(stream::iter(vec![
                TransportEvent::Text(BOOT.into()),
                TransportEvent::Error("reset by peer".into()),
            ]))
            .await;

        assert_eq!(handler.state(), &ConnectionState::Closed);
        assert_eq!(h.registry.count(), 0);
    }

    #[tokio::test]
    async fn end_of_stream_tears_down_unidentified() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);
        handler.run(stream::iter(Vec::<TransportEvent>::new())).await;
        assert_eq!(handler.state(), &ConnectionState::Closed);
    }

    #[test]
    fn boot_reply_has_only_protocol_fields() {
        let h = Harness::new();
        let (mut handler, _rx) = h.connect(1);
        let OcppFrame::CallResult { payload, .. } = reply(&mut handler, BOOT) else {
            panic!("expected CallResult");
        };
        let keys: Vec<&String> = payload.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["currentTime", "interval", "status"]);
        assert_eq!(payload["status"], json!("Accepted"));
    }
}
