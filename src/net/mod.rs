// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network services: TCP/UDP session management over a shared core.
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                    TcpService / UdpService                   |
//! |  service core (loop, handlers, modules)  +  session table    |
//! +--------------------------------------------------------------+
//! |  TCP: mio reactor pool      |  UDP: cooperative poll in tick |
//! |  - acceptor (reactor 0)     |  - one bound datagram socket   |
//! |  - framed read / write      |  - endpoint -> session demux   |
//! +--------------------------------------------------------------+
//! ```
//!
//! Bytes arriving on a socket are framed into messages via the runtime
//! [`MessageFactory`](crate::message::MessageFactory) (TCP) or handed
//! raw to a datagram handler (UDP), then posted into the owning
//! service's queue. Sessions are owned by their service's table;
//! handlers hold the non-owning [`Session`] capability.

pub mod frame;
pub(crate) mod shared;
pub mod tcp;
pub mod udp;

pub use shared::SessionRegistry;
pub use tcp::TcpService;
pub use udp::{UdpService, UdpSession};

use crate::error::{Error, Result};
use crate::message::Message;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Session identifier; unique within a service for the process
/// lifetime, 0 is reserved invalid.
pub type SessionId = u32;

/// Session state machine.
///
/// The core only drives `Disconnected <-> Connecting -> Connected ->
/// Closing -> Disconnected`; the authentication states are carried for
/// upper layers via [`Session::set_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Closing,
}

impl SessionState {
    /// States in which the session accepts sends and counts as active
    /// for the idle sweep.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Authenticated)
    }
}

/// Capability set exposed for an endpoint-specific context.
///
/// Sessions are owned by their service's table; everything handed to
/// user code is a non-owning `Arc<dyn Session>`.
pub trait Session: Send + Sync {
    fn id(&self) -> SessionId;

    fn remote_addr(&self) -> SocketAddr;

    fn state(&self) -> SessionState;

    /// Carry an upper-layer state (e.g. `Authenticated`). The core
    /// keeps driving its own transitions regardless.
    fn set_state(&self, state: SessionState);

    /// Milliseconds since the last successful read, write or explicit
    /// [`Session::touch`].
    fn idle_time_ms(&self) -> u64;

    /// Explicitly reset the idle clock.
    fn touch(&self);

    /// Serialize, frame and queue a message for transmission.
    fn send(&self, msg: &dyn Message) -> Result<()>;

    /// Close the session. Idempotent; pending I/O completes with
    /// suppressed errors.
    fn close(&self) -> Result<()>;

    // ========================================================================
    // Attributes (string -> string, per-session lock, independent of
    // the send path)
    // ========================================================================

    fn set_attribute(&self, key: &str, value: &str);

    fn attribute(&self, key: &str) -> Option<String>;

    fn has_attribute(&self, key: &str) -> bool;

    fn remove_attribute(&self, key: &str);

    fn clear_attributes(&self);
}

/// Session event fan-out. All hooks default to no-ops.
///
/// Events fire outside the session-table lock; `on_closed` fires
/// exactly once per session.
pub trait SessionHandler: Send + Sync {
    /// Session inserted into the table.
    fn on_created(&self, _session: &dyn Session) {}

    /// Session ready for traffic.
    fn on_opened(&self, _session: &dyn Session) {}

    /// Session removed from the table.
    fn on_closed(&self, _session: &dyn Session) {}

    /// Session exceeded the idle timeout; `close()` follows.
    fn on_idle(&self, _session: &dyn Session) {}

    /// I/O error on the session; `close()` follows.
    fn on_error(&self, _session: &dyn Session, _error: &Error) {}

    /// A framed message arrived (fired before queue dispatch).
    fn on_message_received(&self, _session: &dyn Session, _msg: &dyn Message) {}

    /// A message was handed to the transport.
    fn on_message_sent(&self, _session: &dyn Session, _msg: &dyn Message) {}
}

/// Per-service traffic counters (relaxed atomics).
#[derive(Debug, Default)]
pub struct NetMetrics {
    total_connections: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl NetMetrics {
    pub(crate) fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn total_messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn total_messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_accumulate() {
        let metrics = NetMetrics::default();
        metrics.record_connection();
        metrics.record_received(10);
        metrics.record_received(20);
        metrics.record_sent(5);

        assert_eq!(metrics.total_connections(), 1);
        assert_eq!(metrics.total_messages_received(), 2);
        assert_eq!(metrics.total_bytes_received(), 30);
        assert_eq!(metrics.total_messages_sent(), 1);
        assert_eq!(metrics.total_bytes_sent(), 5);
    }

    #[test]
    fn test_active_states() {
        assert!(SessionState::Connected.is_active());
        assert!(SessionState::Authenticated.is_active());
        assert!(!SessionState::Connecting.is_active());
        assert!(!SessionState::Closing.is_active());
        assert!(!SessionState::Disconnected.is_active());
    }
}
