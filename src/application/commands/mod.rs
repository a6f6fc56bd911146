//! Command sender for Central System to Charge Point communication
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handler ──► remote_start / remote_stop ──► CommandSender ──► SessionRegistry
//!                  (typed v1.6 request)           │                  lookup + send
//!                                                 │
//!                                    pending table (uniqueId → PendingRequest)
//!                                                 ▲
//!                  OcppHandler (CallResult) ──────┤ resolve
//!                  timeout sweeper ───────────────┘ expire
//! ```
//!
//! [`CommandSender::send_command`] returns as soon as the Call has been
//! queued on the target connection. The returned [`DispatchedCommand`]
//! carries the correlation id and a receiver that yields the charger's
//! reply or [`CommandError::Timeout`]; dropping it makes the send
//! fire-and-forget, with the outcome only logged.

pub mod remote_start;
pub mod remote_stop;

pub use remote_start::remote_start_transaction;
pub use remote_stop::remote_stop_transaction;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::{ConnectionId, SharedSessionRegistry};
use crate::domain::ChargePointIdentity;
use crate::shared::ocpp_frame::OcppFrame;
use crate::shared::shutdown::ShutdownSignal;

/// Default lifetime of a pending correlation.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Charge point not connected: {0}")]
    NotConnected(String),

    #[error("Response timeout")]
    Timeout,

    #[error("Command abandoned before a response arrived")]
    Abandoned,

    #[error("Failed to serialize request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// What a waiter eventually receives for a dispatched command.
pub type CommandOutcome = Result<Value, CommandError>;

struct PendingRequest {
    charge_point_id: ChargePointIdentity,
    connection_id: ConnectionId,
    action_name: String,
    issued_at: Instant,
    response_sender: oneshot::Sender<CommandOutcome>,
}

/// Handle to a command that has been queued on a charge point connection.
#[derive(Debug)]
pub struct DispatchedCommand {
    pub unique_id: String,
    response: oneshot::Receiver<CommandOutcome>,
}

impl DispatchedCommand {
    /// Wait for the charger's CallResult payload, or the timeout verdict.
    pub async fn response(self) -> CommandOutcome {
        self.response.await.unwrap_or(Err(CommandError::Abandoned))
    }
}

/// Command sender for sending OCPP commands to charge points
pub struct CommandSender {
    session_registry: SharedSessionRegistry,
    pending_requests: DashMap<String, PendingRequest>,
    message_counter: AtomicU64,
    response_timeout: Duration,
}

impl CommandSender {
    pub fn new(session_registry: SharedSessionRegistry) -> Self {
        Self::with_timeout(session_registry, DEFAULT_RESPONSE_TIMEOUT)
    }

    pub fn with_timeout(session_registry: SharedSessionRegistry, response_timeout: Duration) -> Self {
        Self {
            session_registry,
            pending_requests: DashMap::new(),
            message_counter: AtomicU64::new(1),
            response_timeout,
        }
    }

    /// Send an OCPP Call to a charge point.
    ///
    /// The pending correlation is recorded before the frame is queued, so a
    /// reply racing back on another task always finds it.
    pub fn send_command(
        &self,
        charge_point_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<DispatchedCommand, CommandError> {
        let connection = self
            .session_registry
            .lookup(charge_point_id)
            .ok_or_else(|| CommandError::NotConnected(charge_point_id.to_string()))?;
        let identity = ChargePointIdentity::new(charge_point_id)
            .ok_or_else(|| CommandError::NotConnected(charge_point_id.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let message_id = self.reserve_message_id(PendingRequest {
            charge_point_id: identity,
            connection_id: connection.id(),
            action_name: action.to_string(),
            issued_at: Instant::now(),
            response_sender: tx,
        });

        let frame = OcppFrame::Call {
            unique_id: message_id.clone(),
            action: action.to_string(),
            payload,
        };

        info!(
            charge_point_id,
            action,
            message_id = message_id.as_str(),
            connection_id = %connection.id(),
            "Sending command"
        );

        if connection.send(frame.serialize()).is_err() {
            self.pending_requests.remove(&message_id);
            self.record_pending_gauge();
            warn!(
                charge_point_id,
                action,
                message_id = message_id.as_str(),
                "Connection closed before the command could be queued"
            );
            return Err(CommandError::NotConnected(charge_point_id.to_string()));
        }

        metrics::counter!("ocpp_commands_total", "action" => action.to_string()).increment(1);

        Ok(DispatchedCommand {
            unique_id: message_id,
            response: rx,
        })
    }

    /// Allocate a correlation id that is not currently pending and store
    /// `request` under it.
    fn reserve_message_id(&self, request: PendingRequest) -> String {
        let mut request = Some(request);
        loop {
            let id = format!("CS-{}", self.message_counter.fetch_add(1, Ordering::SeqCst));
            match self.pending_requests.entry(id.clone()) {
                Entry::Vacant(slot) => {
                    if let Some(request) = request.take() {
                        slot.insert(request);
                    }
                    self.record_pending_gauge();
                    return id;
                }
                Entry::Occupied(_) => {
                    debug!(message_id = id.as_str(), "Correlation id in use, skipping");
                }
            }
        }
    }

    /// Resolve a pending command with the CallResult received on
    /// `connection_id`. Returns `false` for unsolicited results.
    pub fn handle_response(
        &self,
        connection_id: ConnectionId,
        message_id: &str,
        payload: Value,
    ) -> bool {
        let Some((_, pending)) = self
            .pending_requests
            .remove_if(message_id, |_, pending| pending.connection_id == connection_id)
        else {
            return false;
        };
        self.record_pending_gauge();

        let elapsed = pending.issued_at.elapsed();
        metrics::counter!("ocpp_command_results_total", "outcome" => "resolved").increment(1);
        metrics::histogram!("ocpp_command_latency_seconds", "action" => pending.action_name.clone())
            .record(elapsed.as_secs_f64());

        info!(
            charge_point_id = pending.charge_point_id.as_str(),
            action = pending.action_name.as_str(),
            message_id,
            status = payload.get("status").and_then(|status| status.as_str()).unwrap_or("-"),
            elapsed_ms = elapsed.as_millis() as u64,
            "Received response"
        );

        if pending.response_sender.send(Ok(payload)).is_err() {
            debug!(message_id, "No caller waiting for response");
        }
        true
    }

    /// Expire every pending command issued at least `response_timeout`
    /// before `now`. Each expired waiter is told [`CommandError::Timeout`]
    /// exactly once. Returns the number of expired commands.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let timeout = self.response_timeout;
        let is_expired = |pending: &PendingRequest| {
            now.saturating_duration_since(pending.issued_at) >= timeout
        };

        let candidates: Vec<String> = self
            .pending_requests
            .iter()
            .filter(|entry| is_expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = 0;
        for message_id in candidates {
            // A CallResult may have resolved it since the scan.
            let Some((_, pending)) = self
                .pending_requests
                .remove_if(&message_id, |_, pending| is_expired(pending))
            else {
                continue;
            };
            expired += 1;

            warn!(
                charge_point_id = pending.charge_point_id.as_str(),
                action = pending.action_name.as_str(),
                message_id = message_id.as_str(),
                timeout_secs = timeout.as_secs(),
                "Command timed out"
            );
            metrics::counter!("ocpp_command_results_total", "outcome" => "timeout").increment(1);
            if pending.response_sender.send(Err(CommandError::Timeout)).is_err() {
                debug!(message_id = message_id.as_str(), "No caller waiting for timeout");
            }
        }

        if expired > 0 {
            self.record_pending_gauge();
        }
        expired
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `every` until shutdown.
    pub fn start_timeout_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        let sender = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                interval_ms = every.as_millis() as u64,
                timeout_secs = sender.response_timeout.as_secs(),
                "⏱️ Command timeout sweeper started"
            );

            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut stop = Box::pin(shutdown.notified().wait());

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        sender.sweep_expired(Instant::now());
                    }
                    _ = &mut stop => {
                        info!("⏱️ Command timeout sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Whether `message_id` is still awaiting a CallResult.
    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending_requests.contains_key(message_id)
    }

    /// Number of commands awaiting a CallResult.
    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }

    fn record_pending_gauge(&self) {
        metrics::gauge!("ocpp_pending_commands").set(self.pending_requests.len() as f64);
    }
}

pub type SharedCommandSender = Arc<CommandSender>;

pub fn create_command_sender(
    session_registry: SharedSessionRegistry,
    response_timeout: Duration,
) -> SharedCommandSender {
    Arc::new(CommandSender::with_timeout(session_registry, response_timeout))
}
