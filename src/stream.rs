//! # Per-stream pumps and the Connect task
//!
//! A stream moves through three phases, each backed by its own spawned
//! task: [`run_connect`] resolves the CONNECT frame into a live TCP
//! socket (or a failure), then [`run_ws_to_tcp`] and [`run_tcp_to_ws`]
//! shuttle bytes for as long as the socket and the WebSocket both stay
//! up. All three report back to the owning [`crate::connection::Connection`]
//! over an internal event channel rather than touching the stream table
//! directly — the table has exactly one owner (§5 of the design doc).

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::codec::{close_reason, encode, Frame, StreamType, CONTINUE_EVERY, QUEUE_SIZE, TCP_CHUNK};

/// Messages spawned stream tasks report back to the Connection dispatcher.
pub enum StreamEvent {
    /// The Connect task resolved the upstream and is handing over the
    /// live socket for the dispatcher to install and spawn pumps for.
    Connected { stream_id: u32, tcp: TcpStream },
    /// The Connect task failed (unsupported stream type or network
    /// failure); the stream never reaches `Open`.
    ConnectFailed { stream_id: u32, reason: u8 },
    /// A pump exited. `reason` is `Some` when the dispatcher should emit
    /// a CLOSE frame for this stream; `None` when the WebSocket itself
    /// is already gone and there is nowhere to send one.
    PumpDone {
        stream_id: u32,
        reason: Option<u8>,
    },
}

/// Resolves a CONNECT frame into a TCP connection (§4.3).
///
/// `stream_type` is the raw, unvalidated wire byte from the CONNECT
/// frame — this is the sole point that rejects anything other than
/// TCP, matching `main.py`'s `new_stream` check. UDP and any other
/// unrecognized value are rejected without attempting any resolution,
/// matching the "do not attempt any resolution" requirement verbatim.
pub async fn run_connect(
    stream_id: u32,
    stream_type: u8,
    hostname: String,
    dest_port: u16,
    events: mpsc::UnboundedSender<StreamEvent>,
) {
    if StreamType::from_byte(stream_type) != Some(StreamType::Tcp) {
        let _ = events.send(StreamEvent::ConnectFailed {
            stream_id,
            reason: close_reason::INVALID_STREAM_TYPE,
        });
        return;
    }

    match TcpStream::connect((hostname.as_str(), dest_port)).await {
        Ok(tcp) => {
            debug!(stream_id, hostname, dest_port, "upstream connected");
            let _ = events.send(StreamEvent::Connected { stream_id, tcp });
        }
        Err(err) => {
            warn!(stream_id, hostname, dest_port, %err, "upstream connect failed");
            let _ = events.send(StreamEvent::ConnectFailed {
                stream_id,
                reason: close_reason::CONNECT_FAILED,
            });
        }
    }
}

/// Drains `inbound_rx` in FIFO order and writes each payload to the TCP
/// write half, emitting a CONTINUE credit frame every [`CONTINUE_EVERY`]
/// payloads drained (§4.4).
pub async fn run_ws_to_tcp(
    stream_id: u32,
    mut tcp_write: OwnedWriteHalf,
    mut inbound_rx: mpsc::Receiver<Vec<u8>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    events: mpsc::UnboundedSender<StreamEvent>,
) {
    let mut packets_consumed: u64 = 0;
    while let Some(payload) = inbound_rx.recv().await {
        if let Err(err) = tcp_write.write_all(&payload).await {
            debug!(stream_id, %err, "tcp write failed");
            let _ = events.send(StreamEvent::PumpDone {
                stream_id,
                reason: Some(close_reason::NETWORK_ERROR),
            });
            return;
        }

        packets_consumed += 1;
        if packets_consumed % CONTINUE_EVERY == 0 {
            let buffer_remaining = (QUEUE_SIZE - inbound_rx.len()).min(u8::MAX as usize) as u8;
            let frame = encode(&Frame::Continue {
                stream_id,
                buffer_remaining,
            });
            if outbound_tx.send(frame).await.is_err() {
                return;
            }
        }
    }
    // inbound_rx closed: the dispatcher dropped our sender while tearing
    // this stream down itself. Nothing left to report.
}

/// Reads up to [`TCP_CHUNK`] bytes at a time from the TCP read half and
/// forwards each non-empty read as a DATA frame (§4.5).
pub async fn run_tcp_to_ws(
    stream_id: u32,
    mut tcp_read: OwnedReadHalf,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    events: mpsc::UnboundedSender<StreamEvent>,
) {
    let mut buf = vec![0u8; TCP_CHUNK];
    loop {
        match tcp_read.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(StreamEvent::PumpDone {
                    stream_id,
                    reason: Some(close_reason::VOLUNTARY),
                });
                return;
            }
            Ok(n) => {
                let frame = encode(&Frame::Data {
                    stream_id,
                    payload: buf[..n].to_vec(),
                });
                if outbound_tx.send(frame).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(stream_id, %err, "tcp read failed");
                let _ = events.send(StreamEvent::PumpDone {
                    stream_id,
                    reason: Some(close_reason::NETWORK_ERROR),
                });
                return;
            }
        }
    }
}
