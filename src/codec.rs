//! # Wisp Frame Codec
//!
//! Packs and unpacks Wisp v1 binary frames. Every WebSocket binary message
//! handled by the multiplexer is exactly one frame: a 5-byte header
//! (1-byte type, 4-byte little-endian stream id) followed by a
//! type-specific payload. The codec performs no I/O — it only slices and
//! copies the bytes it is given.

use thiserror::Error;

/// Per-stream inbound queue depth, in DATA payloads.
pub const QUEUE_SIZE: usize = 128;

/// Upstream TCP read chunk size.
pub const TCP_CHUNK: usize = 64 * 1024;

/// Number of drains between CONTINUE credit frames.
pub const CONTINUE_EVERY: u64 = (QUEUE_SIZE / 4) as u64;

/// Stream id reserved for connection-scoped CONTINUE frames.
pub const CONTROL_STREAM_ID: u32 = 0;

const HEADER_LEN: usize = 5;

/// The four Wisp v1 wire packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 0x01,
    Data = 0x02,
    Continue = 0x03,
    Close = 0x04,
}

impl PacketType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Connect),
            0x02 => Some(Self::Data),
            0x03 => Some(Self::Continue),
            0x04 => Some(Self::Close),
            _ => None,
        }
    }
}

/// The stream type carried in a CONNECT frame.
///
/// `decode` does not validate this value — it is a raw wire byte on
/// [`Frame::Connect`], classified here only by the Connect task, which
/// is the sole rejection point for unsupported stream types (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Tcp,
    Udp,
}

impl StreamType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Tcp),
            2 => Some(Self::Udp),
            _ => None,
        }
    }
}

impl From<StreamType> for u8 {
    fn from(stream_type: StreamType) -> u8 {
        match stream_type {
            StreamType::Tcp => 1,
            StreamType::Udp => 2,
        }
    }
}

/// Server-originated CLOSE reasons (§6).
pub mod close_reason {
    pub const UNEXPECTED: u8 = 0x01;
    pub const VOLUNTARY: u8 = 0x02;
    pub const NETWORK_ERROR: u8 = 0x03;
    pub const INVALID_STREAM_TYPE: u8 = 0x41;
    pub const CONNECT_FAILED: u8 = 0x42;
}

/// A decoded Wisp frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Connect {
        stream_id: u32,
        /// Raw wire byte, unvalidated — see [`StreamType`].
        stream_type: u8,
        dest_port: u16,
        hostname: String,
    },
    Data {
        stream_id: u32,
        payload: Vec<u8>,
    },
    Continue {
        stream_id: u32,
        buffer_remaining: u8,
    },
    Close {
        stream_id: u32,
        reason: u8,
    },
}

impl Frame {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Connect { stream_id, .. }
            | Frame::Data { stream_id, .. }
            | Frame::Continue { stream_id, .. }
            | Frame::Close { stream_id, .. } => *stream_id,
        }
    }
}

/// Errors surfaced while decoding a wire message into a [`Frame`].
///
/// Decoding is total over well-formed input; a `FrameError` tells the
/// dispatcher to drop the offending message and keep serving the
/// connection — the protocol has no NAK.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame shorter than the 5-byte header")]
    TooShort,
    #[error("unknown packet type byte {0:#04x}")]
    UnknownType(u8),
    #[error("CONNECT payload too short or hostname is not valid UTF-8")]
    MalformedConnect,
    #[error("CONTINUE payload must be exactly 1 byte")]
    MalformedContinue,
    #[error("CLOSE payload must be exactly 1 byte")]
    MalformedClose,
}

/// Decodes one WebSocket binary message into a [`Frame`].
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::TooShort);
    }
    let packet_type = PacketType::from_byte(bytes[0]).ok_or(FrameError::UnknownType(bytes[0]))?;
    let stream_id = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let payload = &bytes[HEADER_LEN..];

    match packet_type {
        PacketType::Connect => {
            if payload.len() < 3 {
                return Err(FrameError::MalformedConnect);
            }
            let stream_type = payload[0];
            let dest_port = u16::from_le_bytes([payload[1], payload[2]]);
            let hostname = std::str::from_utf8(&payload[3..])
                .map_err(|_| FrameError::MalformedConnect)?
                .to_string();
            Ok(Frame::Connect {
                stream_id,
                stream_type,
                dest_port,
                hostname,
            })
        }
        PacketType::Data => Ok(Frame::Data {
            stream_id,
            payload: payload.to_vec(),
        }),
        PacketType::Continue => {
            if payload.len() != 1 {
                return Err(FrameError::MalformedContinue);
            }
            Ok(Frame::Continue {
                stream_id,
                buffer_remaining: payload[0],
            })
        }
        PacketType::Close => {
            if payload.len() != 1 {
                return Err(FrameError::MalformedClose);
            }
            Ok(Frame::Close {
                stream_id,
                reason: payload[0],
            })
        }
    }
}

/// Serializes a [`Frame`] into a WebSocket binary message.
pub fn encode(frame: &Frame) -> Vec<u8> {
    match frame {
        Frame::Connect {
            stream_id,
            stream_type,
            dest_port,
            hostname,
        } => {
            let mut buf = Vec::with_capacity(HEADER_LEN + 3 + hostname.len());
            write_header(&mut buf, PacketType::Connect, *stream_id);
            buf.push(*stream_type);
            buf.extend_from_slice(&dest_port.to_le_bytes());
            buf.extend_from_slice(hostname.as_bytes());
            buf
        }
        Frame::Data { stream_id, payload } => {
            let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
            write_header(&mut buf, PacketType::Data, *stream_id);
            buf.extend_from_slice(payload);
            buf
        }
        Frame::Continue {
            stream_id,
            buffer_remaining,
        } => {
            let mut buf = Vec::with_capacity(HEADER_LEN + 1);
            write_header(&mut buf, PacketType::Continue, *stream_id);
            buf.push(*buffer_remaining);
            buf
        }
        Frame::Close { stream_id, reason } => {
            let mut buf = Vec::with_capacity(HEADER_LEN + 1);
            write_header(&mut buf, PacketType::Close, *stream_id);
            buf.push(*reason);
            buf
        }
    }
}

fn write_header(buf: &mut Vec<u8>, packet_type: PacketType, stream_id: u32) {
    buf.push(packet_type as u8);
    buf.extend_from_slice(&stream_id.to_le_bytes());
}

/// Builds the encoded CONTINUE frame the dispatcher sends once at
/// connection start on the reserved control stream id.
pub fn initial_continue_frame() -> Vec<u8> {
    encode(&Frame::Continue {
        stream_id: CONTROL_STREAM_ID,
        buffer_remaining: QUEUE_SIZE as u8,
    })
}
