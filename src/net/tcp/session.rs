// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP session: connection-backed endpoint context.
//!
//! The session object is a handle; the socket itself lives on the
//! reactor that owns the connection. `send` serializes and frames the
//! message, then hands the buffer to the reactor over its command
//! channel, so the caller never blocks on the socket.

use super::io_thread::IoHandle;
use crate::error::{Error, ErrorKind, Result};
use crate::message::Message;
use crate::net::frame;
use crate::net::shared::{NetShared, SessionCore};
use crate::net::{Session, SessionId, SessionState};
use std::net::SocketAddr;
use std::sync::Weak;

/// Connection-backed session owned by a [`TcpService`](super::TcpService).
pub struct TcpSession {
    core: SessionCore,
    io: IoHandle,
    shared: Weak<NetShared>,
}

impl TcpSession {
    pub(crate) fn new(
        id: SessionId,
        remote_addr: SocketAddr,
        io: IoHandle,
        shared: Weak<NetShared>,
    ) -> Self {
        Self {
            core: SessionCore::new(id, remote_addr, SessionState::Connecting),
            io,
            shared,
        }
    }

    /// Reactor-side: transition to `Disconnected` through `Closing`.
    pub(crate) fn mark_disconnected(&self) {
        self.core.begin_close();
        self.core.set_state(SessionState::Disconnected);
    }
}

impl Session for TcpSession {
    fn id(&self) -> SessionId {
        self.core.id()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.core.remote_addr()
    }

    fn state(&self) -> SessionState {
        self.core.state()
    }

    fn set_state(&self, state: SessionState) {
        self.core.set_state(state);
    }

    fn idle_time_ms(&self) -> u64 {
        self.core.idle_time_ms()
    }

    fn touch(&self) {
        self.core.touch();
    }

    fn send(&self, msg: &dyn Message) -> Result<()> {
        let state = self.core.state();
        if !state.is_active() {
            return Err(Error::new(
                ErrorKind::ConnectionClosed,
                format!("session {} is {:?}", self.core.id(), state),
            ));
        }

        let body = msg.serialize()?;
        let wire = frame::encode(msg.category(), msg.id(), &body);
        let wire_len = wire.len();
        self.io.send_frame(self.core.id(), wire)?;
        self.core.touch();

        if let Some(shared) = self.shared.upgrade() {
            shared.metrics().record_sent(wire_len);
            if let Some(handler) = shared.handler() {
                handler.on_message_sent(self, msg);
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.core.begin_close() {
            return Ok(()); // already closing or closed
        }
        if self.io.close(self.core.id()).is_err() {
            // Reactor already gone: finish the transition locally
            self.core.set_state(SessionState::Disconnected);
            if let Some(shared) = self.shared.upgrade() {
                shared.remove_session(self.core.id());
            }
        }
        Ok(())
    }

    fn set_attribute(&self, key: &str, value: &str) {
        self.core.set_attribute(key, value);
    }

    fn attribute(&self, key: &str) -> Option<String> {
        self.core.attribute(key)
    }

    fn has_attribute(&self, key: &str) -> bool {
        self.core.has_attribute(key)
    }

    fn remove_attribute(&self, key: &str) {
        self.core.remove_attribute(key);
    }

    fn clear_attributes(&self) {
        self.core.clear_attributes();
    }
}
