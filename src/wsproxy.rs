//! # Degenerate Single-Stream Passthrough ("WSProxy" mode, §6/§A.5)
//!
//! WebSocket URL paths that do not end in `/` select this trivial mode
//! instead of the Wisp multiplexer: the final path segment names
//! `host:port`, one TCP connection is opened to it, and every WebSocket
//! message is forwarded verbatim in both directions. There is no
//! framing, no stream table, and no flow control — the whole connection
//! *is* the one stream.
//!
//! Grounded directly in `main.py`'s `WSProxyConnection` and structurally
//! identical to the teacher's `relay.rs` two-task shape, minus the
//! per-stream bookkeeping a single hardcoded stream doesn't need.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::codec::TCP_CHUNK;

/// Parses the trailing `host:port` path segment and relays the
/// WebSocket verbatim to/from that single TCP connection.
pub async fn run(socket: WebSocket, target: String) {
    let Some((host, port)) = target.rsplit_once(':') else {
        warn!(target, "wsproxy: malformed host:port target");
        return;
    };
    let Ok(port) = port.parse::<u16>() else {
        warn!(target, "wsproxy: malformed port");
        return;
    };

    let tcp = match TcpStream::connect((host, port)).await {
        Ok(tcp) => tcp,
        Err(err) => {
            warn!(host, port, %err, "wsproxy: upstream connect failed");
            return;
        }
    };
    info!(host, port, "wsproxy: upstream connected");

    let (mut tcp_read, mut tcp_write) = tcp.into_split();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let ws_to_tcp = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            let bytes = match msg {
                Message::Binary(b) => b.to_vec(),
                Message::Text(t) => t.as_bytes().to_vec(),
                Message::Close(_) => break,
                _ => continue,
            };
            if tcp_write.write_all(&bytes).await.is_err() {
                break;
            }
        }
    };

    let tcp_to_ws = async {
        let mut buf = vec![0u8; TCP_CHUNK];
        loop {
            match tcp_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if ws_tx.send(Message::Binary(buf[..n].to_vec().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = ws_to_tcp => {},
        _ = tcp_to_ws => {},
    }
}
