// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP session: endpoint-synthesized context.
//!
//! There is no connection behind a UDP session; its lifetime is
//! governed by the service's `session_timeout_ms` eviction sweep.
//! `send` is a convenience wrapper that frames the message and routes
//! it through the service socket.

use super::service::UdpShared;
use crate::error::{Error, ErrorKind, Result};
use crate::message::Message;
use crate::net::frame;
use crate::net::shared::SessionCore;
use crate::net::{Session, SessionId, SessionState};
use std::net::SocketAddr;
use std::sync::Weak;

/// Endpoint-keyed session owned by a [`UdpService`](super::UdpService).
pub struct UdpSession {
    core: SessionCore,
    service: Weak<UdpShared>,
}

impl UdpSession {
    pub(crate) fn new(id: SessionId, endpoint: SocketAddr, service: Weak<UdpShared>) -> Self {
        Self {
            core: SessionCore::new(id, endpoint, SessionState::Connected),
            service,
        }
    }

    /// The `(address, port)` pair identifying the peer.
    pub fn endpoint(&self) -> SocketAddr {
        self.core.remote_addr()
    }

    pub(crate) fn mark_disconnected(&self) {
        self.core.begin_close();
        self.core.set_state(SessionState::Disconnected);
    }
}

impl Session for UdpSession {
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

    /// Serialize, frame and transmit via the service socket.
    fn send(&self, msg: &dyn Message) -> Result<()> {
        if !self.core.state().is_active() {
            return Err(Error::new(
                ErrorKind::SessionClosed,
                format!("session {}", self.core.id()),
            ));
        }
        let service = self.service.upgrade().ok_or_else(|| {
            Error::new(ErrorKind::Service, "UDP service no longer exists")
        })?;

        let body = msg.serialize()?;
        let wire = frame::encode(msg.category(), msg.id(), &body);
        service.send_to(self.core.remote_addr(), &wire)?;
        self.core.touch();

        if let Some(handler) = service.net().handler() {
            handler.on_message_sent(self, msg);
        }
        Ok(())
    }

    /// Mark the session closed and drop it from the endpoint map and
    /// session table. Idempotent; no socket interaction.
    fn close(&self) -> Result<()> {
        if !self.core.begin_close() {
            return Ok(());
        }
        self.core.set_state(SessionState::Disconnected);
        if let Some(service) = self.service.upgrade() {
            service.forget_endpoint(self.core.remote_addr());
            service.net().remove_session(self.core.id());
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
