//! End-to-end scenarios against a real Wisp connection: a live Axum
//! server on a loopback port, driven with a real `tokio-tungstenite`
//! WebSocket client, relaying to real loopback TCP "upstream" sockets
//! (§8 concrete scenarios 1 through 6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use wisp_proxy::codec::{close_reason, decode, encode, Frame, StreamType, QUEUE_SIZE};
use wisp_proxy::state::AppState;

/// Starts the full app on an ephemeral loopback port and returns its
/// `ws://` base URL.
async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = wisp_proxy::build_router(AppState::new(), None);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("ws://{addr}")
}

/// Starts a one-shot echo server: accepts exactly one connection and
/// echoes every byte it reads back until EOF.
async fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut sock, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            loop {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if sock.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    addr
}

/// Starts an upstream that echoes exactly one read back, then closes
/// its side of the connection (EOF for the peer), signaling `closed`
/// once it observes EOF on its own read half.
async fn spawn_echo_once_then_close(closed: Arc<AtomicBool>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut sock, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            if let Ok(n) = sock.read(&mut buf).await {
                let _ = sock.write_all(&buf[..n]).await;
            }
            sock.shutdown().await.ok();
            // Drain until the peer also closes, so we observe EOF.
            while let Ok(n) = sock.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
            closed.store(true, Ordering::SeqCst);
        }
    });
    addr
}

async fn connect_ws(
    base: &str,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let url = format!("{base}/");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send_frame(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    frame: &Frame,
) {
    ws.send(WsMessage::Binary(encode(frame).into())).await.unwrap();
}

async fn recv_frame(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Frame {
    loop {
        match ws.next().await.expect("websocket closed unexpectedly") {
            Ok(WsMessage::Binary(bytes)) => return decode(&bytes).expect("malformed frame"),
            Ok(_) => continue,
            Err(err) => panic!("websocket error: {err}"),
        }
    }
}

#[tokio::test]
async fn initial_continue_then_round_trip_echo() {
    let base = spawn_server().await;
    let upstream = spawn_echo_server().await;
    let mut ws = connect_ws(&base).await;

    let initial = recv_frame(&mut ws).await;
    assert_eq!(
        initial,
        Frame::Continue {
            stream_id: 0,
            buffer_remaining: QUEUE_SIZE as u8,
        }
    );

    send_frame(
        &mut ws,
        &Frame::Connect {
            stream_id: 7,
            stream_type: StreamType::Tcp.into(),
            dest_port: upstream.port(),
            hostname: upstream.ip().to_string(),
        },
    )
    .await;

    let payload = b"hello upstream".to_vec();
    send_frame(
        &mut ws,
        &Frame::Data {
            stream_id: 7,
            payload: payload.clone(),
        },
    )
    .await;

    let echoed = recv_frame(&mut ws).await;
    assert_eq!(
        echoed,
        Frame::Data {
            stream_id: 7,
            payload
        }
    );
}

#[tokio::test]
async fn udp_connect_is_rejected_without_resolution() {
    let base = spawn_server().await;
    let mut ws = connect_ws(&base).await;
    let _ = recv_frame(&mut ws).await; // initial CONTINUE

    send_frame(
        &mut ws,
        &Frame::Connect {
            stream_id: 7,
            stream_type: StreamType::Udp.into(),
            dest_port: 53,
            hostname: "1.1.1.1".to_string(),
        },
    )
    .await;

    let close = recv_frame(&mut ws).await;
    assert_eq!(
        close,
        Frame::Close {
            stream_id: 7,
            reason: close_reason::INVALID_STREAM_TYPE,
        }
    );
}

#[tokio::test]
async fn refused_connect_closes_with_network_error() {
    let base = spawn_server().await;
    let mut ws = connect_ws(&base).await;
    let _ = recv_frame(&mut ws).await; // initial CONTINUE

    // Bind a listener only to immediately drop it, freeing the port
    // while making a refusal likely; loopback port 1 is a privileged
    // port that is reliably refused without root.
    send_frame(
        &mut ws,
        &Frame::Connect {
            stream_id: 9,
            stream_type: StreamType::Tcp.into(),
            dest_port: 1,
            hostname: "127.0.0.1".to_string(),
        },
    )
    .await;

    let close = recv_frame(&mut ws).await;
    assert_eq!(
        close,
        Frame::Close {
            stream_id: 9,
            reason: close_reason::CONNECT_FAILED,
        }
    );
}

#[tokio::test]
async fn client_close_mid_transfer_drops_subsequent_data() {
    let base = spawn_server().await;
    let upstream = spawn_echo_server().await;
    let mut ws = connect_ws(&base).await;
    let _ = recv_frame(&mut ws).await;

    send_frame(
        &mut ws,
        &Frame::Connect {
            stream_id: 5,
            stream_type: StreamType::Tcp.into(),
            dest_port: upstream.port(),
            hostname: upstream.ip().to_string(),
        },
    )
    .await;

    send_frame(
        &mut ws,
        &Frame::Close {
            stream_id: 5,
            reason: close_reason::UNEXPECTED,
        },
    )
    .await;

    // Give the dispatcher a turn to process the CLOSE before probing.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Further DATA for the now-closed stream must be silently dropped:
    // no frame at all should arrive for stream 5 within a short window.
    send_frame(
        &mut ws,
        &Frame::Data {
            stream_id: 5,
            payload: b"too late".to_vec(),
        },
    )
    .await;

    let result = tokio::time::timeout(std::time::Duration::from_millis(200), recv_frame(&mut ws)).await;
    assert!(result.is_err(), "expected no frames after stream close, got one");
}

#[tokio::test]
async fn sustained_transfer_grants_bounded_continue_credit() {
    let base = spawn_server().await;
    let upstream = spawn_echo_server().await;
    let mut ws = connect_ws(&base).await;
    let _ = recv_frame(&mut ws).await;

    send_frame(
        &mut ws,
        &Frame::Connect {
            stream_id: 3,
            stream_type: StreamType::Tcp.into(),
            dest_port: upstream.port(),
            hostname: upstream.ip().to_string(),
        },
    )
    .await;

    let chunk = vec![0xABu8; 1024];
    for _ in 0..200 {
        send_frame(
            &mut ws,
            &Frame::Data {
                stream_id: 3,
                payload: chunk.clone(),
            },
        )
        .await;
    }

    let mut continues = 0;
    let mut data_frames = 0;
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline && (continues < 6 || data_frames < 200) {
        let frame = match tokio::time::timeout_at(deadline, recv_frame(&mut ws)).await {
            Ok(f) => f,
            Err(_) => break,
        };
        match frame {
            Frame::Continue {
                stream_id: 3,
                buffer_remaining,
            } => {
                assert!(buffer_remaining as usize <= QUEUE_SIZE);
                continues += 1;
            }
            Frame::Data { stream_id: 3, .. } => data_frames += 1,
            _ => {}
        }
    }

    assert!(
        continues >= 6,
        "expected at least 6 CONTINUE frames for 200 payloads, got {continues}"
    );
}

#[tokio::test]
async fn upstream_eof_closes_stream_with_voluntary_reason() {
    let base = spawn_server().await;
    let closed = Arc::new(AtomicBool::new(false));
    let upstream = spawn_echo_once_then_close(closed.clone()).await;
    let mut ws = connect_ws(&base).await;
    let _ = recv_frame(&mut ws).await;

    send_frame(
        &mut ws,
        &Frame::Connect {
            stream_id: 11,
            stream_type: StreamType::Tcp.into(),
            dest_port: upstream.port(),
            hostname: upstream.ip().to_string(),
        },
    )
    .await;

    let payload = b"ping".to_vec();
    send_frame(
        &mut ws,
        &Frame::Data {
            stream_id: 11,
            payload: payload.clone(),
        },
    )
    .await;

    let echoed = recv_frame(&mut ws).await;
    assert_eq!(
        echoed,
        Frame::Data {
            stream_id: 11,
            payload
        }
    );

    let close = recv_frame(&mut ws).await;
    assert_eq!(
        close,
        Frame::Close {
            stream_id: 11,
            reason: close_reason::VOLUNTARY,
        }
    );
}

#[tokio::test]
async fn ws_disconnect_tears_down_all_open_streams() {
    let base = spawn_server().await;
    let flags: Vec<_> = (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();
    let mut upstreams = Vec::new();
    for flag in &flags {
        upstreams.push(spawn_echo_once_then_close(flag.clone()).await);
    }

    let mut ws = connect_ws(&base).await;
    let _ = recv_frame(&mut ws).await;

    for (i, upstream) in upstreams.iter().enumerate() {
        send_frame(
            &mut ws,
            &Frame::Connect {
                stream_id: 20 + i as u32,
                stream_type: StreamType::Tcp.into(),
                dest_port: upstream.port(),
                hostname: upstream.ip().to_string(),
            },
        )
        .await;
    }

    // Give the connect tasks a turn to establish all three sockets.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Dropping the client side closes the WebSocket; the dispatcher's
    // teardown path must close every still-open TCP socket in turn.
    drop(ws);

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline
        && !flags.iter().all(|f| f.load(Ordering::SeqCst))
    {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert!(
        flags.iter().all(|f| f.load(Ordering::SeqCst)),
        "expected all three upstream sockets to observe EOF after ws disconnect"
    );
}
