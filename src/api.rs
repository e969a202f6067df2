//! # REST API Endpoints
//!
//! Provides HTTP API endpoints for querying server state.
//! Currently only exposes a list of open Wisp connections.

use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

/// Response item representing a single open Connection.
#[derive(Serialize)]
pub struct ConnectionListItem {
    /// The connection's unique identifier (a UUID).
    pub connection_id: String,
    /// The client's socket address, if known.
    pub peer_addr: Option<String>,
    /// Number of streams currently open on this connection.
    pub stream_count: usize,
}

/// `GET /api/connections` — Returns a JSON array of all currently open
/// Wisp connections.
///
/// This is observability surface only; it carries no Wisp wire-protocol
/// semantics and is not read by the multiplexer itself.
pub async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionListItem>> {
    let connections: Vec<ConnectionListItem> = state
        .connections
        .iter()
        .map(|entry| {
            let info = entry.value();
            ConnectionListItem {
                connection_id: info.connection_id.clone(),
                peer_addr: info.peer_addr.clone(),
                stream_count: info.streams_open(),
            }
        })
        .collect();
    Json(connections)
}
