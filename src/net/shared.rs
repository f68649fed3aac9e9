// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State shared by the TCP and UDP services: the session table, the
//! session-id generator, event fan-out and the idle sweep.
//!
//! The table is guarded by one mutex per service; iteration returns a
//! snapshot so user callbacks never run under the lock.

use super::{NetMetrics, Session, SessionHandler, SessionId, SessionState};
use crate::config::NetServiceConfig;
use crate::error::Error;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

/// Per-session state common to TCP and UDP variants: identity, state
/// machine, activity clock and the attribute map.
pub(crate) struct SessionCore {
    id: SessionId,
    remote_addr: SocketAddr,
    state: Mutex<SessionState>,
    epoch: Instant,
    last_activity_ms: AtomicU64,
    attributes: Mutex<HashMap<String, String>>,
}

impl SessionCore {
    pub(crate) fn new(id: SessionId, remote_addr: SocketAddr, state: SessionState) -> Self {
        Self {
            id,
            remote_addr,
            state: Mutex::new(state),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Transition to `Closing` unless already closing or disconnected.
    /// Returns false when the close is redundant.
    pub(crate) fn begin_close(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            SessionState::Closing | SessionState::Disconnected => false,
            _ => {
                *state = SessionState::Closing;
                true
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn touch(&self) {
        self.last_activity_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn idle_time_ms(&self) -> u64 {
        self.now_ms()
            .saturating_sub(self.last_activity_ms.load(Ordering::Relaxed))
    }

    // Attribute map: own lock, never touched by the send path

    pub(crate) fn set_attribute(&self, key: &str, value: &str) {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    pub(crate) fn attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub(crate) fn has_attribute(&self, key: &str) -> bool {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub(crate) fn remove_attribute(&self, key: &str) {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub(crate) fn clear_attributes(&self) {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Session table and event fan-out shared by a network service and its
/// reactor threads.
pub(crate) struct NetShared {
    config: NetServiceConfig,
    sessions: Mutex<HashMap<SessionId, Arc<dyn Session>>>,
    next_session_id: AtomicU32,
    handler: RwLock<Option<Arc<dyn SessionHandler>>>,
    metrics: NetMetrics,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl NetShared {
    pub(crate) fn new(config: NetServiceConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU32::new(1),
            handler: RwLock::new(None),
            metrics: NetMetrics::default(),
            local_addr: Mutex::new(None),
        }
    }

    pub(crate) fn metrics(&self) -> &NetMetrics {
        &self.metrics
    }

    pub(crate) fn set_local_addr(&self, addr: Option<SocketAddr>) {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = addr;
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next session id; 0 is skipped on wrap.
    pub(crate) fn next_session_id(&self) -> SessionId {
        loop {
            let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    pub(crate) fn set_handler(&self, handler: Option<Arc<dyn SessionHandler>>) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn SessionHandler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<dyn Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a session and fire `on_created` (outside the lock).
    pub(crate) fn add_session(&self, session: Arc<dyn Session>) -> crate::error::Result<()> {
        let id = session.id();
        {
            let mut sessions = self.lock_sessions();
            if sessions.contains_key(&id) {
                return Err(Error::new(
                    crate::error::ErrorKind::SessionAlreadyExists,
                    format!("session {}", id),
                ));
            }
            sessions.insert(id, Arc::clone(&session));
        }
        self.metrics.record_connection();
        if let Some(handler) = self.handler() {
            handler.on_created(&*session);
        }
        Ok(())
    }

    /// Remove a session and fire `on_closed` (outside the lock).
    /// Returns the session only on first removal, making `on_closed`
    /// exactly-once.
    pub(crate) fn remove_session(&self, id: SessionId) -> Option<Arc<dyn Session>> {
        let session = self.lock_sessions().remove(&id)?;
        if let Some(handler) = self.handler() {
            handler.on_closed(&*session);
        }
        Some(session)
    }

    pub(crate) fn session(&self, id: SessionId) -> Option<Arc<dyn Session>> {
        self.lock_sessions().get(&id).cloned()
    }

    /// Snapshot of every session; callbacks never run under the table
    /// lock.
    pub(crate) fn sessions_snapshot(&self) -> Vec<Arc<dyn Session>> {
        self.lock_sessions().values().cloned().collect()
    }

    pub(crate) fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Close every session (service shutdown).
    pub(crate) fn close_all_sessions(&self) {
        for session in self.sessions_snapshot() {
            if let Err(err) = session.close() {
                log::debug!("[SESSION] close during shutdown: {}", err);
            }
        }
    }

    /// Evict sessions idle past `idle_timeout_ms`: fire `on_idle`, then
    /// close. A timeout of 0 disables the sweep.
    pub(crate) fn idle_sweep(&self) {
        let timeout = self.config.idle_timeout_ms;
        if timeout == 0 {
            return;
        }
        for session in self.sessions_snapshot() {
            if !session.state().is_active() {
                continue;
            }
            let idle = session.idle_time_ms();
            if idle > timeout {
                log::debug!(
                    "[SESSION] session {} idle for {} ms (limit {}), evicting",
                    session.id(),
                    idle,
                    timeout
                );
                if let Some(handler) = self.handler() {
                    handler.on_idle(&*session);
                }
                if let Err(err) = session.close() {
                    log::warn!("[SESSION] idle close of {}: {}", session.id(), err);
                }
            }
        }
    }

    /// Fire `on_error` for a session.
    pub(crate) fn notify_error(&self, session: &dyn Session, error: &Error) {
        if let Some(handler) = self.handler() {
            handler.on_error(session, error);
        }
    }
}

/// Cheap cloneable view over a service's session table.
///
/// Message handlers capture a registry to resolve the session a message
/// arrived on (via [`crate::message::Message::session_id`]) and reply.
#[derive(Clone)]
pub struct SessionRegistry {
    pub(crate) shared: Arc<NetShared>,
}

impl SessionRegistry {
    /// Look up a session by id.
    pub fn get(&self, id: SessionId) -> Option<Arc<dyn Session>> {
        self.shared.session(id)
    }

    /// Snapshot of every live session.
    pub fn snapshot(&self) -> Vec<Arc<dyn Session>> {
        self.shared.sessions_snapshot()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.shared.session_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::message::Message;
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Duration;

    /// Table-driven fake session for exercising the shared core.
    struct FakeSession {
        core: SessionCore,
        closed: AtomicU32,
    }

    impl FakeSession {
        fn new(id: SessionId) -> Arc<Self> {
            let addr: SocketAddr = "127.0.0.1:9".parse().expect("addr");
            Arc::new(Self {
                core: SessionCore::new(id, addr, SessionState::Connected),
                closed: AtomicU32::new(0),
            })
        }
    }

    impl Session for FakeSession {
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
        fn send(&self, _msg: &dyn Message) -> Result<()> {
            Ok(())
        }
        fn close(&self) -> Result<()> {
            if self.core.begin_close() {
                self.closed.fetch_add(1, Ordering::SeqCst);
                self.core.set_state(SessionState::Disconnected);
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

    #[derive(Default)]
    struct CountingHandler {
        created: AtomicU32,
        closed: AtomicU32,
        idle: AtomicU32,
    }

    impl SessionHandler for CountingHandler {
        fn on_created(&self, _session: &dyn Session) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
        fn on_closed(&self, _session: &dyn Session) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_idle(&self, _session: &dyn Session) {
            self.idle.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_session_id_generation_skips_zero() {
        let shared = NetShared::new(NetServiceConfig::default());
        let first = shared.next_session_id();
        assert_eq!(first, 1);
        assert_eq!(shared.next_session_id(), 2);
    }

    #[test]
    fn test_add_remove_fires_events_once() {
        let shared = NetShared::new(NetServiceConfig::default());
        let handler = Arc::new(CountingHandler::default());
        shared.set_handler(Some(handler.clone()));

        let session = FakeSession::new(7);
        shared
            .add_session(session.clone() as Arc<dyn Session>)
            .expect("add");
        assert_eq!(handler.created.load(Ordering::SeqCst), 1);
        assert_eq!(shared.metrics().total_connections(), 1);

        // Duplicate id is rejected
        let dup = FakeSession::new(7);
        assert_eq!(
            shared
                .add_session(dup as Arc<dyn Session>)
                .unwrap_err()
                .kind(),
            crate::error::ErrorKind::SessionAlreadyExists
        );

        assert!(shared.remove_session(7).is_some());
        assert!(shared.remove_session(7).is_none(), "second removal is a no-op");
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_sweep_evicts_only_stale_sessions() {
        let mut config = NetServiceConfig::default();
        config.idle_timeout_ms = 40;
        let shared = NetShared::new(config);
        let handler = Arc::new(CountingHandler::default());
        shared.set_handler(Some(handler.clone()));

        let stale = FakeSession::new(1);
        let fresh = FakeSession::new(2);
        shared
            .add_session(stale.clone() as Arc<dyn Session>)
            .expect("add");
        shared
            .add_session(fresh.clone() as Arc<dyn Session>)
            .expect("add");

        thread::sleep(Duration::from_millis(80));
        fresh.touch();
        shared.idle_sweep();

        assert_eq!(handler.idle.load(Ordering::SeqCst), 1);
        assert_eq!(stale.closed.load(Ordering::SeqCst), 1);
        assert_eq!(fresh.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_idle_sweep_disabled_by_zero_timeout() {
        let mut config = NetServiceConfig::default();
        config.idle_timeout_ms = 0;
        let shared = NetShared::new(config);
        let session = FakeSession::new(1);
        shared
            .add_session(session.clone() as Arc<dyn Session>)
            .expect("add");

        thread::sleep(Duration::from_millis(30));
        shared.idle_sweep();
        assert_eq!(session.closed.load(Ordering::SeqCst), 0);
    }

    // Idle time grows without activity and resets on touch.
    #[test]
    fn test_idle_clock_resets_on_touch() {
        let session = FakeSession::new(1);
        thread::sleep(Duration::from_millis(30));
        let before = session.idle_time_ms();
        assert!(before >= 25, "idle clock advances");

        session.touch();
        assert!(session.idle_time_ms() < before);
    }

    #[test]
    fn test_attributes_roundtrip() {
        let session = FakeSession::new(1);
        assert!(!session.has_attribute("user"));
        session.set_attribute("user", "alice");
        assert_eq!(session.attribute("user").as_deref(), Some("alice"));
        assert!(session.has_attribute("user"));

        session.set_attribute("role", "admin");
        session.remove_attribute("user");
        assert!(!session.has_attribute("user"));
        session.clear_attributes();
        assert!(!session.has_attribute("role"));
    }
}
