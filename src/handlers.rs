//! # WebSocket Handlers
//!
//! Upgrades the HTTP connection and routes it by URL path to either the
//! Wisp multiplexer (paths ending in `/`) or the degenerate single-
//! stream passthrough (§6 URL routing).

use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, OriginalUri, State,
    },
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use crate::connection::Connection;
use crate::state::{AppState, ConnectionInfo};
use crate::wsproxy;

/// `GET /{*path}` — Upgrades the HTTP connection to a WebSocket.
///
/// Mounted at the root so any path can select a mode, matching the
/// original server which listened on a single endpoint. After the
/// upgrade, [`handle_connection`] inspects the original request path:
/// a trailing `/` selects the Wisp multiplexer (§6); anything else is
/// the degenerate passthrough, whose final segment names `host:port`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    ws.on_upgrade(move |socket| handle_connection(socket, state, path, Some(peer_addr.to_string())))
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    path: String,
    peer_addr: Option<String>,
) {
    if path.ends_with('/') {
        let connection_id = Uuid::new_v4().to_string();
        let stream_count = Arc::new(AtomicUsize::new(0));
        info!(connection_id, ?peer_addr, "wisp connection accepted");
        state.connections.insert(
            connection_id.clone(),
            ConnectionInfo {
                connection_id: connection_id.clone(),
                peer_addr,
                stream_count: stream_count.clone(),
            },
        );

        Connection::run(socket, stream_count).await;

        state.connections.remove(&connection_id);
        info!(connection_id, "wisp connection closed");
    } else {
        let target = path.rsplit('/').next().unwrap_or_default().to_string();
        info!(target, ?peer_addr, "wsproxy connection accepted");
        wsproxy::run(socket, target).await;
    }
}
