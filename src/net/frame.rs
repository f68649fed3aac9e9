// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire framing for the TCP message protocol.
//!
//! TCP is a stream without message boundaries; every message travels
//! under a fixed 7-byte header:
//!
//! ```text
//! +----------+-----------+----------------+------------------+
//! | category | id (u16)  | body_size (u32)| body bytes       |
//! |  1 byte  |  2 bytes  |    4 bytes     |  body_size bytes |
//! +----------+-----------+----------------+------------------+
//! ```
//!
//! Multi-byte fields are little-endian. The codec keeps partial read
//! state so it can be driven by a non-blocking socket: call
//! [`FrameCodec::decode`] whenever the socket is readable until it
//! returns `Ok(None)`.

use std::fmt;
use std::io::{self, Read};

/// Fixed header size: category (1) + id (2) + body_size (4).
pub const FRAME_HEADER_SIZE: usize = 7;

/// A decoded frame: wire identity plus the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub category: u8,
    pub id: u16,
    pub body: Vec<u8>,
}

/// Decode failure.
#[derive(Debug)]
pub enum FrameError {
    /// Header announced a body larger than the configured limit. The
    /// stream position is unrecoverable; the session must close.
    TooLarge { body_len: usize, max: usize },

    /// Underlying I/O failure (including EOF mid-frame).
    Io(io::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooLarge { body_len, max } => {
                write!(f, "frame body {} bytes exceeds limit {}", body_len, max)
            }
            FrameError::Io(err) => write!(f, "frame i/o error: {}", err),
        }
    }
}

impl std::error::Error for FrameError {}

/// Encode a message body under the 7-byte header.
pub fn encode(category: u8, id: u16, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    encode_into(category, id, body, &mut buf);
    buf
}

/// Append a framed message to an existing buffer.
pub fn encode_into(category: u8, id: u16, body: &[u8], buf: &mut Vec<u8>) {
    buf.push(category);
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(body);
}

/// Incremental read state.
#[derive(Debug, Clone, Copy)]
enum ReadState {
    /// Reading the 7-byte header
    Header { read: usize },

    /// Reading the body
    Body {
        category: u8,
        id: u16,
        body_len: usize,
        read: usize,
    },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Header { read: 0 }
    }
}

/// Stream decoder for framed messages.
#[derive(Debug)]
pub struct FrameCodec {
    state: ReadState,
    buffer: Vec<u8>,

    /// Maximum accepted body size (anti-OOM guard)
    max_body: usize,

    frames_decoded: u64,
    bytes_decoded: u64,
    frames_rejected: u64,
}

impl FrameCodec {
    /// Create a codec accepting bodies up to `max_body` bytes.
    pub fn new(max_body: usize) -> Self {
        Self {
            state: ReadState::default(),
            buffer: vec![0u8; FRAME_HEADER_SIZE],
            max_body,
            frames_decoded: 0,
            bytes_decoded: 0,
            frames_rejected: 0,
        }
    }

    pub fn max_body(&self) -> usize {
        self.max_body
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Whether the codec is mid-frame.
    pub fn is_partial(&self) -> bool {
        match self.state {
            ReadState::Header { read } => read > 0,
            ReadState::Body { .. } => true,
        }
    }

    /// Reset partial state (after a connection reset).
    pub fn reset(&mut self) {
        self.state = ReadState::default();
        self.buffer.resize(FRAME_HEADER_SIZE, 0);
    }

    /// Try to decode one complete frame from the reader.
    ///
    /// - `Ok(Some(frame))`: a frame completed
    /// - `Ok(None)`: the socket would block; call again on readable
    /// - `Err(TooLarge)`: oversize body announced, close the session
    /// - `Err(Io)`: hard I/O failure or EOF
    pub fn decode<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.state {
                ReadState::Header { read } => {
                    match reader.read(&mut self.buffer[read..FRAME_HEADER_SIZE]) {
                        Ok(0) => {
                            let message = if read == 0 {
                                "connection closed"
                            } else {
                                "eof inside frame header"
                            };
                            return Err(FrameError::Io(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                message,
                            )));
                        }
                        Ok(n) => {
                            let total = read + n;
                            if total < FRAME_HEADER_SIZE {
                                self.state = ReadState::Header { read: total };
                                continue;
                            }

                            let category = self.buffer[0];
                            let id = u16::from_le_bytes([self.buffer[1], self.buffer[2]]);
                            let body_len = u32::from_le_bytes([
                                self.buffer[3],
                                self.buffer[4],
                                self.buffer[5],
                                self.buffer[6],
                            ]) as usize;

                            if body_len > self.max_body {
                                self.frames_rejected += 1;
                                self.state = ReadState::default();
                                return Err(FrameError::TooLarge {
                                    body_len,
                                    max: self.max_body,
                                });
                            }

                            if body_len == 0 {
                                self.frames_decoded += 1;
                                self.state = ReadState::default();
                                return Ok(Some(Frame {
                                    category,
                                    id,
                                    body: Vec::new(),
                                }));
                            }

                            self.buffer.resize(body_len, 0);
                            self.state = ReadState::Body {
                                category,
                                id,
                                body_len,
                                read: 0,
                            };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.state = ReadState::Header { read };
                            return Ok(None);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(FrameError::Io(e)),
                    }
                }

                ReadState::Body {
                    category,
                    id,
                    body_len,
                    read,
                } => {
                    match reader.read(&mut self.buffer[read..body_len]) {
                        Ok(0) => {
                            return Err(FrameError::Io(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "eof inside frame body",
                            )));
                        }
                        Ok(n) => {
                            let total = read + n;
                            if total < body_len {
                                self.state = ReadState::Body {
                                    category,
                                    id,
                                    body_len,
                                    read: total,
                                };
                                continue;
                            }

                            let body = self.buffer[..body_len].to_vec();
                            self.frames_decoded += 1;
                            self.bytes_decoded += body_len as u64;
                            self.buffer.resize(FRAME_HEADER_SIZE, 0);
                            self.state = ReadState::default();
                            return Ok(Some(Frame { category, id, body }));
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.state = ReadState::Body {
                                category,
                                id,
                                body_len,
                                read,
                            };
                            return Ok(None);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(FrameError::Io(e)),
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_layout() {
        let frame = encode(1, 0x0203, b"hi");
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 2);
        assert_eq!(frame[0], 1);
        assert_eq!(&frame[1..3], &[0x03, 0x02], "id is little-endian");
        assert_eq!(&frame[3..7], &2u32.to_le_bytes());
        assert_eq!(&frame[7..], b"hi");
    }

    #[test]
    fn test_decode_roundtrip() {
        let mut codec = FrameCodec::new(1024);
        let wire = encode(5, 42, b"payload");
        let mut cursor = Cursor::new(wire);

        let frame = codec
            .decode(&mut cursor)
            .expect("decode")
            .expect("complete frame");
        assert_eq!(frame.category, 5);
        assert_eq!(frame.id, 42);
        assert_eq!(frame.body, b"payload");
        assert_eq!(codec.frames_decoded(), 1);
        assert_eq!(codec.bytes_decoded(), 7);
    }

    #[test]
    fn test_decode_empty_body() {
        let mut codec = FrameCodec::new(1024);
        let wire = encode(1, 1, b"");
        let mut cursor = Cursor::new(wire);

        let frame = codec
            .decode(&mut cursor)
            .expect("decode")
            .expect("complete frame");
        assert!(frame.body.is_empty());
        assert!(!codec.is_partial());
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut codec = FrameCodec::new(1024);
        let mut wire = Vec::new();
        encode_into(1, 1, b"first", &mut wire);
        encode_into(1, 2, b"second", &mut wire);
        let mut cursor = Cursor::new(wire);

        let a = codec.decode(&mut cursor).expect("decode").expect("frame");
        let b = codec.decode(&mut cursor).expect("decode").expect("frame");
        assert_eq!(a.body, b"first");
        assert_eq!(b.id, 2);
        assert_eq!(codec.frames_decoded(), 2);
    }

    #[test]
    fn test_oversize_body_rejected() {
        let mut codec = FrameCodec::new(4);
        let wire = encode(1, 1, b"way too big");
        let mut cursor = Cursor::new(wire);

        match codec.decode(&mut cursor) {
            Err(FrameError::TooLarge { body_len, max }) => {
                assert_eq!(body_len, 11);
                assert_eq!(max, 4);
            }
            other => panic!("expected TooLarge, got {:?}", other.map(|_| ())),
        }
        assert_eq!(codec.frames_rejected(), 1);
    }

    #[test]
    fn test_eof_mid_frame_is_error() {
        let mut codec = FrameCodec::new(1024);
        let wire = encode(1, 1, b"truncated");
        let mut cursor = Cursor::new(&wire[..FRAME_HEADER_SIZE + 3]);

        match codec.decode(&mut cursor) {
            Err(FrameError::Io(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("expected Io error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_partial_then_reset() {
        let mut codec = FrameCodec::new(1024);
        let wire = encode(1, 1, b"body");
        // Truncated header: the call errors, leaving partial state behind
        let mut cursor = Cursor::new(&wire[..3]);
        let _ = codec.decode(&mut cursor);
        assert!(codec.is_partial());

        codec.reset();
        assert!(!codec.is_partial());

        // Full frame decodes cleanly after reset
        let mut cursor = Cursor::new(wire);
        let frame = codec.decode(&mut cursor).expect("decode").expect("frame");
        assert_eq!(frame.body, b"body");
    }

    #[test]
    fn test_max_body_boundary() {
        let mut codec = FrameCodec::new(8);
        let ok = encode(1, 1, b"12345678");
        let frame = codec
            .decode(&mut Cursor::new(ok))
            .expect("decode")
            .expect("frame at limit accepted");
        assert_eq!(frame.body.len(), 8);

        let too_big = encode(1, 1, b"123456789");
        assert!(matches!(
            codec.decode(&mut Cursor::new(too_big)),
            Err(FrameError::TooLarge { .. })
        ));
    }
}
