//! # Connection Dispatcher
//!
//! One [`Connection`] owns everything associated with a single accepted
//! WebSocket speaking Wisp v1: the stream table, the outbound sender
//! task, and the inbound dispatch loop. The stream table is touched only
//! from [`Connection::run`] — spawned pump/connect tasks never see it,
//! they only exchange [`StreamEvent`]s with the dispatcher (§5).

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{self, decode, encode, Frame, FrameError, CONTROL_STREAM_ID, QUEUE_SIZE};
use crate::stream::{run_connect, run_tcp_to_ws, run_ws_to_tcp, StreamEvent};

/// Bookkeeping the dispatcher keeps for one active stream.
///
/// `inbound_tx`/`inbound_rx` form the bounded, single-producer
/// single-consumer queue described in §3: the dispatcher is the sole
/// producer (it pushes DATA payloads here), the WS→TCP pump is the sole
/// consumer. The receiver is held here until the stream reaches `Open`
/// and is handed to the spawned pump exactly once.
struct StreamRecord {
    inbound_tx: mpsc::Sender<Vec<u8>>,
    inbound_rx: Option<mpsc::Receiver<Vec<u8>>>,
    connect_task: Option<JoinHandle<()>>,
    ws_to_tcp_task: Option<JoinHandle<()>>,
    tcp_to_ws_task: Option<JoinHandle<()>>,
}

impl StreamRecord {
    fn connecting(connect_task: JoinHandle<()>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_SIZE);
        Self {
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            connect_task: Some(connect_task),
            ws_to_tcp_task: None,
            tcp_to_ws_task: None,
        }
    }

    /// Aborts every task that is still running. Safe to call more than
    /// once; idempotent in the face of already-finished tasks.
    fn abort_all(&mut self) {
        if let Some(h) = self.connect_task.take() {
            h.abort();
        }
        if let Some(h) = self.ws_to_tcp_task.take() {
            h.abort();
        }
        if let Some(h) = self.tcp_to_ws_task.take() {
            h.abort();
        }
    }
}

/// The Wisp multiplexer for a single accepted WebSocket.
pub struct Connection {
    streams: HashMap<u32, StreamRecord>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
    events_rx: mpsc::UnboundedReceiver<StreamEvent>,
    /// Reported to the ambient connection registry so `GET
    /// /api/connections` can show a live stream count.
    stream_count: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl Connection {
    /// Runs the full lifecycle of one Wisp connection: sends the initial
    /// control CONTINUE, dispatches inbound frames until the WebSocket
    /// dies, then tears every remaining stream down (§4.6, §4.7).
    pub async fn run(socket: WebSocket, stream_count: std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(QUEUE_SIZE);

        // Single outbound sender task: the only task that ever calls
        // `ws_tx.send`, serializing all outbound frames (§5).
        let sender_task = tokio::spawn(async move {
            while let Some(bytes) = outbound_rx.recv().await {
                if ws_tx.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut conn = Connection {
            streams: HashMap::new(),
            outbound_tx,
            events_tx,
            events_rx,
            stream_count,
        };

        if conn
            .outbound_tx
            .send(codec::initial_continue_frame())
            .await
            .is_err()
        {
            sender_task.abort();
            return;
        }

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Binary(bytes))) => conn.dispatch_frame(&bytes).await,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {} // text/ping/pong: not part of the wire protocol
                        Some(Err(err)) => {
                            warn!(%err, "websocket recv error");
                            break;
                        }
                    }
                }
                Some(event) = conn.events_rx.recv() => {
                    conn.handle_event(event).await;
                }
            }
        }

        info!(open_streams = conn.streams.len(), "connection closing, tearing down streams");
        let ids: Vec<u32> = conn.streams.keys().copied().collect();
        for id in ids {
            conn.close_stream(id, None).await;
        }
        sender_task.abort();
    }

    async fn dispatch_frame(&mut self, bytes: &[u8]) {
        let frame = match decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                self.log_frame_error(err);
                return;
            }
        };

        match frame {
            Frame::Connect {
                stream_id,
                stream_type,
                dest_port,
                hostname,
            } => self.on_connect(stream_id, stream_type, dest_port, hostname).await,
            Frame::Data { stream_id, payload } => self.on_data(stream_id, payload).await,
            Frame::Continue { .. } => {
                // Server-to-client only in this implementation (§4.6, §9).
            }
            Frame::Close { stream_id, reason } => self.on_close(stream_id, reason).await,
        }
    }

    fn log_frame_error(&self, err: FrameError) {
        debug!(%err, "dropping malformed frame");
    }

    async fn on_connect(&mut self, stream_id: u32, stream_type: u8, dest_port: u16, hostname: String) {
        if stream_id == CONTROL_STREAM_ID {
            return;
        }
        if self.streams.contains_key(&stream_id) {
            // Duplicate CONNECT for an active id: dropped silently (§9).
            return;
        }

        let events_tx = self.events_tx.clone();
        let connect_task = tokio::spawn(run_connect(stream_id, stream_type, hostname, dest_port, events_tx));
        self.streams.insert(stream_id, StreamRecord::connecting(connect_task));
        self.stream_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    async fn on_data(&mut self, stream_id: u32, payload: Vec<u8>) {
        if stream_id == CONTROL_STREAM_ID {
            return;
        }
        let Some(record) = self.streams.get(&stream_id) else {
            return; // already closed: drop silently
        };
        // Blocking put is the backpressure mechanism upstream of the
        // WebSocket reader (§4.6). If the consumer pump has already
        // disappeared the send simply fails and is ignored.
        let _ = record.inbound_tx.send(payload).await;
    }

    async fn on_close(&mut self, stream_id: u32, reason: u8) {
        if stream_id == CONTROL_STREAM_ID {
            return;
        }
        debug!(stream_id, reason, "client requested close");
        self.close_stream(stream_id, None).await;
    }

    async fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connected { stream_id, tcp } => self.on_connected(stream_id, tcp).await,
            StreamEvent::ConnectFailed { stream_id, reason } => {
                self.close_stream(stream_id, Some(reason)).await;
            }
            StreamEvent::PumpDone { stream_id, reason } => {
                self.close_stream(stream_id, reason).await;
            }
        }
    }

    async fn on_connected(&mut self, stream_id: u32, tcp: TcpStream) {
        let Some(record) = self.streams.get_mut(&stream_id) else {
            // Stream was closed while the connect was in flight; the
            // socket we just received has no home and must not leak.
            drop(tcp);
            return;
        };
        record.connect_task = None; // the connect task has already exited

        let Some(inbound_rx) = record.inbound_rx.take() else {
            // Can only happen if we already transitioned to Open, which
            // would mean a duplicate Connected event. Drop defensively.
            drop(tcp);
            return;
        };

        let (tcp_read, tcp_write) = tcp.into_split();
        let ws_to_tcp = tokio::spawn(run_ws_to_tcp(
            stream_id,
            tcp_write,
            inbound_rx,
            self.outbound_tx.clone(),
            self.events_tx.clone(),
        ));
        let tcp_to_ws = tokio::spawn(run_tcp_to_ws(
            stream_id,
            tcp_read,
            self.outbound_tx.clone(),
            self.events_tx.clone(),
        ));
        record.ws_to_tcp_task = Some(ws_to_tcp);
        record.tcp_to_ws_task = Some(tcp_to_ws);
    }

    /// Idempotent stream teardown (§4.7). Sends a CLOSE frame first (if
    /// `reason` is `Some` — the wire-protocol contract allows at most
    /// one per stream, guaranteed here since a second call finds nothing
    /// to remove), then cancels every task still running for the stream
    /// and discards any payloads left in its inbound queue.
    async fn close_stream(&mut self, stream_id: u32, reason: Option<u8>) {
        let Some(mut record) = self.streams.remove(&stream_id) else {
            return;
        };
        self.stream_count.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

        if let Some(reason) = reason {
            let frame = encode(&Frame::Close { stream_id, reason });
            let _ = self.outbound_tx.send(frame).await;
        }

        record.abort_all();
        // Dropping the record drops `inbound_tx`/`inbound_rx`, discarding
        // any DATA payloads still queued for this stream.
    }
}
