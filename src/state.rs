//! # Process State
//!
//! Ambient, process-wide bookkeeping: a registry of currently open
//! Connections, used only by the REST introspection surface
//! (`GET /api/connections`, §6). It carries no Wisp protocol semantics —
//! the per-connection stream table (§4.2) is owned entirely by that
//! connection's own dispatcher task and never touches this registry.
//!
//! Uses [`DashMap`] for lock-free concurrent access, since many
//! WebSocket connections are accepted concurrently and each needs to
//! register/deregister itself independently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Live bookkeeping for one open Connection, shared between its
/// dispatcher task (which updates `stream_count`) and the REST handler
/// (which only reads it).
#[derive(Clone)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub peer_addr: Option<String>,
    pub stream_count: Arc<AtomicUsize>,
}

impl ConnectionInfo {
    pub fn streams_open(&self) -> usize {
        self.stream_count.load(Ordering::Relaxed)
    }
}

/// Shared application state, cloned into every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Registry of currently open Connections, keyed by connection id.
    pub connections: Arc<DashMap<String, ConnectionInfo>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
        }
    }
}
