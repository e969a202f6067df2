//! # Wisp Multiplexing Proxy
//!
//! A WebSocket-fronted TCP multiplexing proxy. One WebSocket connection
//! carries many independent outbound TCP streams, each framed by the
//! Wisp v1 binary protocol (§6). The server terminates the WebSocket,
//! opens TCP connections to arbitrary upstream hosts on the client's
//! behalf, and shuttles bytes bidirectionally with per-stream credit-
//! based backpressure.
//!
//! ## Modules
//!
//! - [`codec`]      — Wisp v1 frame encode/decode
//! - [`stream`]      — per-stream Connect task and WS↔TCP pumps
//! - [`connection`]  — the stream table and inbound dispatcher
//! - [`handlers`]    — WebSocket upgrade and URL-based mode routing
//! - [`wsproxy`]     — degenerate single-stream passthrough mode
//! - [`state`]       — process-wide connection registry (ambient)
//! - [`api`]         — REST introspection endpoints (ambient)
//! - [`config`]      — environment-derived configuration (ambient)

pub mod api;
pub mod codec;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod state;
pub mod stream;
pub mod wsproxy;

use std::path::Path;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::state::AppState;

/// Builds the full Axum router: the Wisp/WSProxy WebSocket upgrade
/// route, the REST introspection route, CORS, and — when a static root
/// is given — a fallback static-file service (§A.1).
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let app = Router::new()
        .route("/{*path}", get(handlers::ws_handler))
        .route("/", get(handlers::ws_handler))
        .route("/api/connections", get(api::list_connections))
        .layer(CorsLayer::permissive())
        .with_state(state);

    match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    }
}
