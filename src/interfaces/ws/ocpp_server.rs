//! OCPP 1.6 WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{charge_point_id}`.
//! The path segment is only a hint; the registry identity comes from the
//! charger's BootNotification.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::application::commands::SharedCommandSender;
use crate::application::handlers::{OcppHandler, TransportEvent};
use crate::application::session::{Connection, ConnectionId, SharedSessionRegistry};
use crate::shared::shutdown::ShutdownSignal;

use super::negotiator::{self, Negotiation};

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// How long a closing connection's writer may keep flushing queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// OCPP WebSocket Server
pub struct OcppServer {
    listener: TcpListener,
    session_registry: SharedSessionRegistry,
    command_sender: SharedCommandSender,
    heartbeat_interval: u32,
    shutdown_timeout: Duration,
    shutdown: ShutdownSignal,
    next_connection_id: Arc<AtomicU64>,
}

impl OcppServer {
    /// Wrap an already bound listener.
    pub fn new(
        listener: TcpListener,
        session_registry: SharedSessionRegistry,
        command_sender: SharedCommandSender,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            listener,
            session_registry,
            command_sender,
            heartbeat_interval: crate::application::handlers::DEFAULT_HEARTBEAT_INTERVAL,
            shutdown_timeout: Duration::from_secs(30),
            shutdown,
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_heartbeat_interval(mut self, seconds: u32) -> Self {
        self.heartbeat_interval = seconds;
        self
    }

    /// Upper bound on how long shutdown waits for open connections.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Accept connections until shutdown is triggered.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("🔌 OCPP 1.6 gateway listening on ws://{}", addr);
            info!(
                "   Charge points should connect to: ws://{}/ocpp/{{charge_point_id}}",
                addr
            );
        }

        let mut connections = JoinSet::new();
        let mut stop = Box::pin(self.shutdown.notified().wait());

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::SeqCst));
                            connections.spawn(handle_connection(
                                stream,
                                addr,
                                id,
                                self.session_registry.clone(),
                                self.command_sender.clone(),
                                self.heartbeat_interval,
                                self.shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut stop => {
                    info!("🛑 WebSocket server received shutdown signal");
                    break;
                }
            }
        }

        self.drain(connections).await;
    }

    async fn drain(&self, mut connections: JoinSet<()>) {
        let open = connections.len();
        if open > 0 {
            info!(open, "Waiting for connections to close...");
        }

        let all_closed = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(self.shutdown_timeout, all_closed).await.is_err() {
            warn!(
                remaining = connections.len(),
                "Shutdown timeout elapsed, aborting remaining connections"
            );
            connections.abort_all();
        }

        info!("✅ WebSocket server shutdown complete");
    }
}

/// Handle a single WebSocket connection from handshake to teardown.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: ConnectionId,
    session_registry: SharedSessionRegistry,
    command_sender: SharedCommandSender,
    heartbeat_interval: u32,
    shutdown: ShutdownSignal,
) {
    info!(%connection_id, %addr, "New connection");

    let mut path_hint: Option<String> = None;

    let ws_stream = match tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            path_hint = negotiator::path_hint(path).map(str::to_string);

            let requested = req
                .headers()
                .get(SUBPROTOCOL_HEADER)
                .and_then(|v| v.to_str().ok());

            match negotiator::negotiate(requested) {
                Negotiation::Accepted(protocol) => {
                    response
                        .headers_mut()
                        .insert(SUBPROTOCOL_HEADER, HeaderValue::from_static(protocol));
                    debug!(%connection_id, path, "OCPP 1.6 subprotocol accepted");
                }
                Negotiation::NotRequested => {
                    warn!(%connection_id, path, "Client requested no subprotocol, assuming ocpp1.6");
                }
                Negotiation::Unsupported => {
                    warn!(
                        %connection_id,
                        path,
                        requested = requested.unwrap_or(""),
                        "Client does not offer ocpp1.6, proceeding anyway"
                    );
                }
            }

            Ok(response)
        },
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%connection_id, %addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    info!(
        %connection_id,
        %addr,
        path_hint = path_hint.as_deref().unwrap_or("-"),
        "WebSocket connected, awaiting BootNotification"
    );
    metrics::counter!("ocpp_connections_total").increment(1);

    let (mut ws_sender, ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Outgoing frames, in the order they were queued
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            debug!(%connection_id, "-> {}", msg);
            if let Err(e) = ws_sender.send(Message::Text(msg)).await {
                warn!(%connection_id, error = %e, "Send error");
                return;
            }
        }
        let _ = ws_sender.close().await;
    });

    let events = ws_receiver.filter_map(move |msg| async move {
        match msg {
            Ok(Message::Text(text)) => Some(TransportEvent::Text(text)),
            Ok(Message::Binary(data)) => {
                warn!(%connection_id, bytes = data.len(), "Binary message received, ignoring");
                None
            }
            Ok(Message::Close(frame)) => {
                Some(TransportEvent::Closed(frame.map(|f| f.reason.to_string())))
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
            Err(e) => Some(TransportEvent::Error(e.to_string())),
        }
    });

    let connection = Connection::new(connection_id, tx, Some(addr));
    let mut handler = OcppHandler::new(connection, session_registry, command_sender)
        .with_heartbeat_interval(heartbeat_interval);

    tokio::select! {
        _ = handler.run(events) => {}
        _ = shutdown.wait() => {
            info!(%connection_id, "Connection closing due to server shutdown");
        }
    }

    // No-op when the loop already tore down
    handler.close();
    // Dropping the handler releases the last sender, letting the writer finish
    drop(handler);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        debug!(%connection_id, "Writer did not drain in time, aborting");
        writer.abort();
    }
}
