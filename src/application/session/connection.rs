//! WebSocket connection abstraction

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

/// Process-unique identifier of one accepted transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The outbound half of the connection has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// Cheap, cloneable handle to a live charge point connection.
///
/// Frames pushed through [`Connection::send`] are drained by the transport's
/// writer task. Once that task stops, the handle reports itself closed.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<String>,
    remote_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        sender: mpsc::UnboundedSender<String>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            id,
            sender,
            remote_addr,
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a raw text frame for delivery to the charge point.
    pub fn send(&self, frame: String) -> Result<(), ConnectionClosed> {
        self.sender.send(frame).map_err(|_| ConnectionClosed(self.id))
    }

    /// `false` once the transport's writer has hung up.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(ConnectionId(1), tx, None);
        (conn, rx)
    }

    #[test]
    fn new_connection_fields() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id(), ConnectionId(1));
        assert!(conn.remote_addr().is_none());
        assert!(conn.connected_at() <= Utc::now());
        assert!(conn.is_open());
    }

    #[test]
    fn send_delivers_message() {
        let (conn, mut rx) = make_connection();
        conn.send("hello".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn send_to_closed_channel_returns_error() {
        let (conn, rx) = make_connection();
        drop(rx);
        assert!(!conn.is_open());
        assert_eq!(conn.send("msg".into()), Err(ConnectionClosed(ConnectionId(1))));
    }

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId(42).to_string(), "conn-42");
    }
}
