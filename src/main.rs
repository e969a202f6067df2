//! Process entry point: logging, configuration, and the HTTP/WebSocket
//! listener. See `lib.rs` for the module overview.

use tracing::info;

use wisp_proxy::config::Config;
use wisp_proxy::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with env-filter support.
    // Default log level is `info` for this crate.
    // Override with the `RUST_LOG` environment variable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wisp_proxy=info".into()),
        )
        .init();

    let config = Config::from_env();
    let state = AppState::new();
    let app = wisp_proxy::build_router(state, config.static_dir.as_deref());

    let addr = config.listen_addr()?;
    info!("wisp proxy listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
