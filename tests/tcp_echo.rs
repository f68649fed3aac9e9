// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP end-to-end scenarios: echo round-trip, framing order, malformed
//! payload survival, oversize rejection and idle eviction.

use netsvc::config::TcpServiceConfig;
use netsvc::error::{Error, ErrorKind, Result};
use netsvc::message::Message;
use netsvc::net::{Session, SessionHandler, TcpService};
use netsvc::runtime::Runtime;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Test message types
// ============================================================================

/// Plain byte-carrier message, `(category, id) = (1, 1)`.
#[derive(Debug, Default)]
struct TextMessage {
    session_id: u32,
    timestamp_ms: u64,
    payload: Vec<u8>,
}

impl TextMessage {
    fn with_payload(payload: &[u8]) -> Self {
        Self {
            session_id: 0,
            timestamp_ms: 0,
            payload: payload.to_vec(),
        }
    }
}

impl Message for TextMessage {
    fn category(&self) -> u8 {
        1
    }
    fn id(&self) -> u16 {
        1
    }
    fn session_id(&self) -> u32 {
        self.session_id
    }
    fn set_session_id(&mut self, session_id: u32) {
        self.session_id = session_id;
    }
    fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
    fn set_timestamp_ms(&mut self, timestamp_ms: u64) {
        self.timestamp_ms = timestamp_ms;
    }
    fn name(&self) -> &str {
        "text"
    }
    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.payload.clone())
    }
    fn deserialize(&mut self, data: &[u8]) -> Result<()> {
        self.payload = data.to_vec();
        Ok(())
    }
}

/// Message whose deserialize always fails, `(category, id) = (2, 2)`.
#[derive(Debug, Default)]
struct BrokenMessage {
    session_id: u32,
    timestamp_ms: u64,
}

impl Message for BrokenMessage {
    fn category(&self) -> u8 {
        2
    }
    fn id(&self) -> u16 {
        2
    }
    fn session_id(&self) -> u32 {
        self.session_id
    }
    fn set_session_id(&mut self, session_id: u32) {
        self.session_id = session_id;
    }
    fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
    fn set_timestamp_ms(&mut self, timestamp_ms: u64) {
        self.timestamp_ms = timestamp_ms;
    }
    fn name(&self) -> &str {
        "broken"
    }
    fn deserialize(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::new(ErrorKind::InvalidMessage, "refusing payload"))
    }
}

// ============================================================================
// Helpers
// ============================================================================

#[derive(Default)]
struct EventCounter {
    opened: AtomicU32,
    closed: AtomicU32,
    idle: AtomicU32,
    errors: AtomicU32,
}

impl SessionHandler for EventCounter {
    fn on_opened(&self, _session: &dyn Session) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }
    fn on_closed(&self, _session: &dyn Session) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_idle(&self, _session: &dyn Session) {
        self.idle.fetch_add(1, Ordering::SeqCst);
    }
    fn on_error(&self, _session: &dyn Session, _error: &Error) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

/// Start an echo server: handler `(1, 1)` sends the message back on
/// the session it arrived on.
fn start_echo_server(config: TcpServiceConfig) -> (Runtime, TcpService, SocketAddr) {
    let runtime = Runtime::new();
    runtime
        .factory()
        .register(1, 1, || Box::<TextMessage>::default());
    runtime
        .factory()
        .register(2, 2, || Box::<BrokenMessage>::default());

    let config = config.with_bind_address("127.0.0.1".parse().expect("loopback"));
    let service = TcpService::new("echo", config, &runtime);
    let sessions = service.session_registry();
    service
        .register_handler(1, 1, move |msg| {
            if let Some(session) = sessions.get(msg.session_id()) {
                session.send(msg).expect("echo send");
            }
        })
        .expect("register echo handler");

    service.init().expect("init");
    service.start().expect("start");
    let addr = service.local_addr().expect("bound address");
    (runtime, service, addr)
}

fn write_frame(stream: &mut TcpStream, category: u8, id: u16, body: &[u8]) {
    let mut wire = Vec::with_capacity(7 + body.len());
    wire.push(category);
    wire.extend_from_slice(&id.to_le_bytes());
    wire.extend_from_slice(&(body.len() as u32).to_le_bytes());
    wire.extend_from_slice(body);
    stream.write_all(&wire).expect("write frame");
}

fn read_frame(stream: &mut TcpStream) -> (u8, u16, Vec<u8>) {
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).expect("read frame header");
    let category = header[0];
    let id = u16::from_le_bytes([header[1], header[2]]);
    let body_len = u32::from_le_bytes([header[3], header[4], header[5], header[6]]) as usize;
    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).expect("read frame body");
    (category, id, body)
}

// ============================================================================
// Scenarios
// ============================================================================

// Echo round-trip with exact counters.
#[test]
fn test_echo_roundtrip() {
    let (runtime, service, addr) = start_echo_server(TcpServiceConfig::listen(0));

    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");

    write_frame(&mut client, 1, 1, b"ping");
    let (category, id, body) = read_frame(&mut client);
    assert_eq!(category, 1);
    assert_eq!(id, 1);
    assert_eq!(body, b"ping");

    assert_eq!(service.metrics().total_messages_received(), 1);
    assert_eq!(service.metrics().total_messages_sent(), 1);
    assert_eq!(service.metrics().total_connections(), 1);

    drop(client);
    assert!(
        wait_until(Duration::from_secs(2), || service.session_count() == 0),
        "session removed after client close"
    );

    service.stop().expect("stop");
    runtime.shutdown();
}

// Two messages sent on one session arrive in order, bytes intact.
#[test]
fn test_send_order_preserved() {
    let (runtime, service, addr) = start_echo_server(TcpServiceConfig::listen(0));

    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");

    write_frame(&mut client, 1, 1, b"first");
    write_frame(&mut client, 1, 1, b"second");

    let (_, _, body_a) = read_frame(&mut client);
    let (_, _, body_b) = read_frame(&mut client);
    assert_eq!(body_a, b"first");
    assert_eq!(body_b, b"second");

    service.stop().expect("stop");
    runtime.shutdown();
}

// A malformed payload is logged and skipped; the session survives and
// later frames still deliver.
#[test]
fn test_malformed_payload_keeps_session() {
    let (runtime, service, addr) = start_echo_server(TcpServiceConfig::listen(0));

    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");

    // BrokenMessage refuses its body; the frame is dropped
    write_frame(&mut client, 2, 2, b"garbage");
    // The next frame parses fine and echoes back
    write_frame(&mut client, 1, 1, b"still alive");

    let (_, _, body) = read_frame(&mut client);
    assert_eq!(body, b"still alive");
    assert_eq!(
        service.metrics().total_messages_received(),
        1,
        "only the valid message is counted"
    );
    assert_eq!(service.session_count(), 1, "session survived the bad payload");

    service.stop().expect("stop");
    runtime.shutdown();
}

// A header announcing an oversize body closes the session.
#[test]
fn test_oversize_frame_closes_session() {
    let config = TcpServiceConfig::listen(0).with_read_buffer_size(64);
    let runtime = Runtime::new();
    let config = config.with_bind_address("127.0.0.1".parse().expect("loopback"));
    let service = TcpService::new("strict", config, &runtime);
    let counter = Arc::new(EventCounter::default());
    service.set_session_handler(counter.clone());
    service.init().expect("init");
    service.start().expect("start");
    let addr = service.local_addr().expect("bound address");

    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");

    // Claim a 1000-byte body against a 64-byte limit
    write_frame(&mut client, 1, 1, &vec![0u8; 1000]);

    assert!(
        wait_until(Duration::from_secs(2), || {
            counter.closed.load(Ordering::SeqCst) == 1
        }),
        "oversize frame closes the session"
    );
    assert_eq!(counter.errors.load(Ordering::SeqCst), 1);
    assert_eq!(service.session_count(), 0);

    // The peer observes EOF
    let mut buf = [0u8; 1];
    let eof = matches!(client.read(&mut buf), Ok(0));
    assert!(eof, "client sees the connection closed");

    service.stop().expect("stop");
    runtime.shutdown();
}

// A silent session is observed in on_idle then on_closed exactly once.
#[test]
fn test_idle_eviction() {
    let config = TcpServiceConfig::listen(0).with_idle_timeout_ms(500);
    let runtime = Runtime::new();
    let config = config.with_bind_address("127.0.0.1".parse().expect("loopback"));
    let service = TcpService::new("idle", config, &runtime);
    let counter = Arc::new(EventCounter::default());
    service.set_session_handler(counter.clone());
    service.init().expect("init");
    service.start().expect("start");
    let addr = service.local_addr().expect("bound address");

    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");

    assert!(
        wait_until(Duration::from_secs(2), || {
            counter.opened.load(Ordering::SeqCst) == 1
        }),
        "session opened"
    );

    // Send nothing; the sweep evicts after the timeout
    assert!(
        wait_until(Duration::from_secs(3), || {
            counter.closed.load(Ordering::SeqCst) == 1
        }),
        "idle session evicted"
    );
    assert_eq!(counter.idle.load(Ordering::SeqCst), 1, "exactly one on_idle");
    assert_eq!(counter.closed.load(Ordering::SeqCst), 1, "exactly one on_closed");
    assert_eq!(service.session_count(), 0);

    // Eviction closed the socket: the client reads EOF
    let mut buf = [0u8; 1];
    assert!(matches!(client.read(&mut buf), Ok(0)));

    service.stop().expect("stop");
    runtime.shutdown();
}

// Traffic resets the idle clock, so an active session outlives the
// timeout.
#[test]
fn test_activity_defers_eviction() {
    let config = TcpServiceConfig::listen(0).with_idle_timeout_ms(400);
    let (runtime, service, addr) = {
        let runtime = Runtime::new();
        runtime
            .factory()
            .register(1, 1, || Box::<TextMessage>::default());
        let config = config.with_bind_address("127.0.0.1".parse().expect("loopback"));
        let service = TcpService::new("busy", config, &runtime);
        let sessions = service.session_registry();
        service
            .register_handler(1, 1, move |msg| {
                if let Some(session) = sessions.get(msg.session_id()) {
                    session.send(msg).expect("echo send");
                }
            })
            .expect("register");
        service.init().expect("init");
        service.start().expect("start");
        let addr = service.local_addr().expect("bound address");
        (runtime, service, addr)
    };

    let mut client = TcpStream::connect(addr).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");

    // Keep the session busy past two timeout windows
    for _ in 0..5 {
        write_frame(&mut client, 1, 1, b"tick");
        let (_, _, body) = read_frame(&mut client);
        assert_eq!(body, b"tick");
        std::thread::sleep(Duration::from_millis(200));
    }
    assert_eq!(service.session_count(), 1, "active session survives");

    service.stop().expect("stop");
    runtime.shutdown();
}

// Stopping the service closes every session.
#[test]
fn test_stop_closes_sessions() {
    let (runtime, service, addr) = start_echo_server(TcpServiceConfig::listen(0));
    let _client = TcpStream::connect(addr).expect("connect");

    assert!(
        wait_until(Duration::from_secs(2), || service.session_count() == 1),
        "session registered"
    );

    service.stop().expect("stop");
    assert_eq!(service.session_count(), 0);
    runtime.shutdown();
}
