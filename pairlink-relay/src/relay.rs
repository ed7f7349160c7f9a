//! Relay server core: shared state, WebSocket handler, and event delivery.
//!
//! Each upgraded WebSocket is one connection. Its frames are decoded into
//! [`ClientEvent`]s and applied to the shared [`RoomBook`]; the resulting
//! deliveries are pushed onto the target connections' outbound channels while
//! the state lock is still held, so every peer sees events in the order the
//! room state changed.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use pairlink_proto::room::RoomKey;
use pairlink_proto::signal::{self, ClientEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::rooms::{ConnectionId, Delivery, RoomBook};

/// Body served on `GET /`.
const INDEX_BODY: &str = "Signalling server running";

/// Room book plus the outbound channel of every live connection.
#[derive(Default)]
struct Inner {
    book: RoomBook,
    outboxes: HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
}

impl Inner {
    /// Pushes deliveries onto their targets' channels.
    ///
    /// A target whose channel is closed is treated as disconnected on the
    /// spot, which may produce further `peer-left` deliveries.
    fn deliver(&mut self, deliveries: Vec<Delivery>) {
        let mut pending = deliveries;
        while !pending.is_empty() {
            let mut failed = Vec::new();
            for Delivery { to, event } in pending.drain(..) {
                let Some(sender) = self.outboxes.get(&to) else {
                    tracing::debug!(conn = %to, event = event.name(), "target gone, event dropped");
                    continue;
                };
                let text = match signal::encode_server(&event) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(conn = %to, error = %e, "failed to encode server event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).is_err() {
                    tracing::warn!(conn = %to, event = event.name(), "send failed, dropping connection");
                    failed.push(to);
                }
            }
            for conn in failed {
                if self.outboxes.remove(&conn).is_some() {
                    pending.extend(self.book.disconnect(conn));
                }
            }
        }
    }
}

/// Shared relay server state holding the room book and connection channels.
pub struct RelayState {
    inner: Mutex<Inner>,
    /// Maximum accepted inbound frame size in bytes.
    max_frame_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with no connections, using the default
    /// frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new relay state with a custom frame size limit.
    #[must_use]
    pub fn with_config(max_frame_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_frame_size,
        }
    }

    /// Registers a new connection and returns its identifier.
    ///
    /// Events for the connection are pushed onto `sender`.
    pub fn connect(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let conn = ConnectionId::new();
        let mut inner = self.inner.lock();
        inner.book.connect(conn);
        inner.outboxes.insert(conn, sender);
        conn
    }

    /// Applies an inbound event from `conn` and delivers the outcome.
    pub fn dispatch(&self, conn: ConnectionId, event: ClientEvent) {
        tracing::debug!(conn = %conn, event = event.name(), room = event.room_key(), "event received");
        let mut inner = self.inner.lock();
        let deliveries = inner.book.apply(conn, event);
        inner.deliver(deliveries);
    }

    /// Removes a connection, notifying its room-mate if it had one.
    ///
    /// Idempotent; the second call for the same connection does nothing.
    pub fn disconnect(&self, conn: ConnectionId) {
        let mut inner = self.inner.lock();
        inner.outboxes.remove(&conn);
        let deliveries = inner.book.disconnect(conn);
        inner.deliver(deliveries);
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.lock().book.connection_count()
    }

    /// Members of a room in arrival order.
    #[must_use]
    pub fn room_members(&self, key: &RoomKey) -> Vec<ConnectionId> {
        self.inner.lock().book.members(key).to_vec()
    }

    /// Send a WebSocket Close frame to all connected peers.
    ///
    /// Each peer's writer task forwards the frame and stops, after which the
    /// connection is cleaned up as a normal disconnect.
    pub fn close_all_connections(&self) {
        let inner = self.inner.lock();
        for (conn, sender) in &inner.outboxes {
            tracing::info!(conn = %conn, "sending close frame to peer");
            let _ = sender.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection for a single peer.
///
/// The connection lifecycle:
/// 1. Register the connection with no room.
/// 2. Spawn a writer task draining the connection's channel into the socket.
/// 3. Read frames and apply each decoded event in order.
/// 4. When either side ends, disconnect, which releases its room seat.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.connect(tx);
    tracing::info!(conn = %conn, "peer connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn = %conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(conn, text.as_str().as_bytes(), &reader_state);
                }
                Message::Binary(data) => {
                    handle_frame(conn, &data, &reader_state);
                }
                Message::Close(_) => {
                    tracing::info!(conn = %conn, "received close frame");
                    break;
                }
                _ => {
                    // Ping/pong are answered by the transport.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.disconnect(conn);
    tracing::info!(conn = %conn, "peer disconnected");
}

/// Decodes one inbound frame and applies it.
///
/// Oversized and malformed frames are logged and dropped; the peer is not
/// told.
fn handle_frame(conn: ConnectionId, data: &[u8], state: &RelayState) {
    if data.len() > state.max_frame_size {
        tracing::warn!(
            conn = %conn,
            size = data.len(),
            max = state.max_frame_size,
            "frame exceeds size limit, dropped"
        );
        return;
    }

    match signal::decode_client(data) {
        Ok(event) => state.dispatch(conn, event),
        Err(e) => {
            tracing::warn!(conn = %conn, error = %e, "failed to decode event");
        }
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/", axum::routing::get(index_handler))
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port).
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// Liveness endpoint.
async fn index_handler() -> &'static str {
    INDEX_BODY
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
