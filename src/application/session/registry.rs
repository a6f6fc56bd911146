//! Session registry: maps charge point identities to live connections

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::domain::ChargePointIdentity;

use super::connection::{Connection, ConnectionId};

/// Outcome of [`SessionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterResult {
    /// No previous entry existed for the identity.
    Registered,
    /// The identity was already bound to this same connection.
    Refreshed,
    /// The previous entry pointed at a connection that had already closed.
    ReplacedStale { previous: ConnectionId },
    /// The previous entry pointed at a different, still-open connection.
    /// Its mapping was dropped; the connection itself is left alone.
    Evicted { previous: ConnectionId },
}

impl RegisterResult {
    /// Whether a prior live connection lost its mapping.
    pub fn evicted(&self) -> bool {
        matches!(self, Self::Evicted { .. })
    }
}

/// Thread-safe registry of identified charge point sessions.
///
/// Policy on identity collision is last-boot-wins. Entries are only ever
/// removed by the connection that owns them, so a late close on an evicted
/// connection cannot drop its successor's mapping.
pub struct SessionRegistry {
    sessions: DashMap<ChargePointIdentity, Connection>,
}

/// Shared, reference-counted session registry
pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Wrap in `Arc` for shared ownership
    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Bind `identity` to `connection`, replacing any previous binding.
    pub fn register(&self, identity: &ChargePointIdentity, connection: Connection) -> RegisterResult {
        let connection_id = connection.id();
        let previous = self.sessions.insert(identity.clone(), connection);
        self.record_gauge();

        let result = match previous {
            None => RegisterResult::Registered,
            Some(prev) if prev.id() == connection_id => RegisterResult::Refreshed,
            Some(prev) if prev.is_open() => RegisterResult::Evicted { previous: prev.id() },
            Some(prev) => RegisterResult::ReplacedStale { previous: prev.id() },
        };

        match result {
            RegisterResult::Evicted { previous } => warn!(
                charge_point_id = identity.as_str(),
                %connection_id,
                evicted_connection_id = %previous,
                "Identity collision: evicting previous live connection"
            ),
            RegisterResult::ReplacedStale { previous } => info!(
                charge_point_id = identity.as_str(),
                %connection_id,
                stale_connection_id = %previous,
                "Replaced stale charge point session"
            ),
            RegisterResult::Refreshed => debug!(
                charge_point_id = identity.as_str(),
                %connection_id,
                "Charge point session refreshed"
            ),
            RegisterResult::Registered => info!(
                charge_point_id = identity.as_str(),
                %connection_id,
                "Registered charge point session"
            ),
        }

        result
    }

    /// Find the live connection for a charge point.
    pub fn lookup(&self, charge_point_id: &str) -> Option<Connection> {
        self.sessions.get(charge_point_id).map(|entry| entry.value().clone())
    }

    /// Drop the mapping owned by `connection_id`, found by reverse lookup.
    ///
    /// Returns the identity that was unbound, or `None` if the connection
    /// owned no mapping (never identified, or evicted by a newer boot).
    pub fn remove_by_connection(&self, connection_id: ConnectionId) -> Option<ChargePointIdentity> {
        // Collect first: removing while iterating would deadlock on the shard lock.
        let owned: Vec<ChargePointIdentity> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().id() == connection_id)
            .map(|entry| entry.key().clone())
            .collect();

        let removed = owned
            .into_iter()
            .find(|identity| self.unregister_if_owned(identity, connection_id));

        match &removed {
            Some(identity) => info!(
                charge_point_id = identity.as_str(),
                %connection_id,
                "Unregistered charge point session"
            ),
            None => debug!(%connection_id, "Connection owned no session"),
        }

        removed
    }

    /// Remove `identity` only if it is still bound to `connection_id`.
    pub fn unregister_if_owned(&self, identity: &ChargePointIdentity, connection_id: ConnectionId) -> bool {
        let removed = self
            .sessions
            .remove_if(identity, |_, conn| conn.id() == connection_id)
            .is_some();
        if removed {
            self.record_gauge();
        }
        removed
    }

    /// Check if a charge point is currently connected
    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    /// Identity and connection of every session, sorted by identity
    pub fn snapshot(&self) -> Vec<(ChargePointIdentity, Connection)> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions
    }

    /// Number of active sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    fn record_gauge(&self) {
        metrics::gauge!("ocpp_connected_charge_points").set(self.sessions.len() as f64);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
