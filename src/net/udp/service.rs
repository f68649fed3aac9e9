// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP network service: one bound socket, sessions keyed by endpoint.
//!
//! The UDP reactor is cooperative: the service tick drains `recv_from`
//! until the socket would block, so datagram handling is serialized
//! with handler dispatch on the service worker thread. The core is
//! payload-agnostic: received bytes go to the installed datagram
//! handler; parsing is the host's business.

use super::session::UdpSession;
use crate::config::UdpServiceConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::message::queue::{DefaultMessageQueue, MessageQueue};
use crate::message::Message;
use crate::net::shared::NetShared;
use crate::net::{NetMetrics, Session, SessionHandler, SessionId, SessionRegistry};
use crate::runtime::Runtime;
use crate::service::{Module, Service, ServiceDriver, ServiceHandle, ServiceState};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Eviction sweep cadence.
const SWEEP_INTERVAL_MS: u64 = 5000;

/// Receives `(session, datagram bytes)` for every datagram.
pub type DatagramHandler = Arc<dyn Fn(&Arc<UdpSession>, &[u8]) + Send + Sync>;

/// Socket, endpoint map and handler shared between the service facade,
/// its driver and the sessions.
pub(crate) struct UdpShared {
    config: UdpServiceConfig,
    net: Arc<NetShared>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    endpoints: Mutex<HashMap<SocketAddr, Arc<UdpSession>>>,
    datagram_handler: RwLock<Option<DatagramHandler>>,
}

impl UdpShared {
    pub(crate) fn net(&self) -> &Arc<NetShared> {
        &self.net
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn datagram_handler(&self) -> Option<DatagramHandler> {
        self.datagram_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Transmit raw bytes to an endpoint and count the send.
    pub(crate) fn send_to(&self, endpoint: SocketAddr, bytes: &[u8]) -> Result<usize> {
        let socket = self.socket().ok_or_else(|| {
            Error::new(ErrorKind::ServiceNotStarted, "UDP socket not open")
        })?;
        let sent = socket
            .send_to(bytes, endpoint)
            .map_err(|err| Error::io(ErrorKind::Network, &err))?;
        self.net.metrics().record_sent(sent);
        Ok(sent)
    }

    /// Drop an endpoint mapping (session closed or evicted).
    pub(crate) fn forget_endpoint(&self, endpoint: SocketAddr) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&endpoint);
    }

    /// Look up or synthesize the session for an endpoint.
    fn get_or_create_session(self: &Arc<Self>, endpoint: SocketAddr) -> Option<Arc<UdpSession>> {
        {
            let endpoints = self
                .endpoints
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(session) = endpoints.get(&endpoint) {
                return Some(Arc::clone(session));
            }
        }

        let id = self.net.next_session_id();
        let session = Arc::new(UdpSession::new(id, endpoint, Arc::downgrade(self)));
        if let Err(err) = self
            .net
            .add_session(Arc::clone(&session) as Arc<dyn Session>)
        {
            log::error!("[UDP] failed to add session for {}: {}", endpoint, err);
            return None;
        }
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint, Arc::clone(&session));

        log::debug!("[UDP] session {} created for {}", id, endpoint);
        if let Some(handler) = self.net.handler() {
            handler.on_opened(session.as_ref());
        }
        Some(session)
    }

    /// Route one received datagram: stamp activity, count, hand off.
    fn handle_datagram(self: &Arc<Self>, endpoint: SocketAddr, bytes: &[u8]) {
        let Some(session) = self.get_or_create_session(endpoint) else {
            return;
        };
        session.touch();
        self.net.metrics().record_received(bytes.len());

        if let Some(handler) = self.datagram_handler() {
            handler(&session, bytes);
        } else {
            log::trace!(
                "[UDP] {} bytes from {} (no datagram handler installed)",
                bytes.len(),
                endpoint
            );
        }
    }

    /// Evict sessions idle past `session_timeout_ms`; fires `on_closed`
    /// through table removal. A timeout of 0 disables eviction.
    fn evict_stale_sessions(&self) {
        let timeout = self.config.session_timeout_ms;
        if timeout == 0 {
            return;
        }

        let stale: Vec<Arc<UdpSession>> = {
            let endpoints = self
                .endpoints
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            endpoints
                .values()
                .filter(|session| session.idle_time_ms() > timeout)
                .cloned()
                .collect()
        };

        for session in stale {
            log::debug!(
                "[UDP] evicting session {} ({}) idle for {} ms",
                session.id(),
                session.endpoint(),
                session.idle_time_ms()
            );
            session.mark_disconnected();
            self.forget_endpoint(session.endpoint());
            self.net.remove_session(session.id());
        }
    }

    /// Drop every session (service shutdown).
    fn drop_all_sessions(&self) {
        let sessions: Vec<Arc<UdpSession>> = {
            let mut endpoints = self
                .endpoints
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            endpoints.drain().map(|(_, session)| session).collect()
        };
        for session in sessions {
            session.mark_disconnected();
            self.net.remove_session(session.id());
        }
    }
}

/// Driver: binds the socket, polls it from the tick, sweeps stale
/// sessions.
struct UdpDriver {
    config: UdpServiceConfig,
    shared: Arc<UdpShared>,
    recv_buf: Vec<u8>,
    since_sweep_ms: u64,
}

impl ServiceDriver for UdpDriver {
    fn on_start(&mut self) -> Result<()> {
        let socket = build_socket(&self.config).map_err(|err| {
            Error::new(
                ErrorKind::Network,
                format!(
                    "failed to bind {}:{}: {}",
                    self.config.net.bind_address, self.config.net.port, err
                ),
            )
        })?;
        let local_addr = socket.local_addr().ok();
        self.shared.net.set_local_addr(local_addr);
        *self
            .shared
            .socket
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(socket));

        if let Some(addr) = local_addr {
            log::info!("[UDP] bound to {}", addr);
        }
        Ok(())
    }

    fn on_stop(&mut self) -> Result<()> {
        self.shared.drop_all_sessions();
        *self
            .shared
            .socket
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.net.set_local_addr(None);
        Ok(())
    }

    fn on_update(&mut self, elapsed_ms: u64) -> Result<()> {
        self.poll_datagrams();

        self.since_sweep_ms += elapsed_ms;
        if self.since_sweep_ms >= SWEEP_INTERVAL_MS {
            self.since_sweep_ms = 0;
            self.shared.evict_stale_sessions();
        }
        Ok(())
    }
}

impl UdpDriver {
    /// Drain the socket until it would block.
    fn poll_datagrams(&mut self) {
        let Some(socket) = self.shared.socket() else {
            return;
        };
        loop {
            match socket.recv_from(&mut self.recv_buf) {
                Ok((len, endpoint)) => {
                    self.shared.handle_datagram(endpoint, &self.recv_buf[..len]);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::error!("[UDP] recv: {}", err);
                    break;
                }
            }
        }
    }
}

/// UDP service: datagram demux with endpoint-synthesized sessions.
pub struct UdpService {
    service: Service,
    shared: Arc<UdpShared>,
}

impl UdpService {
    /// Create a UDP service with an unbounded default queue.
    pub fn new(name: impl Into<String>, config: UdpServiceConfig, runtime: &Runtime) -> Self {
        Self::with_queue(
            name,
            config,
            runtime,
            Arc::new(DefaultMessageQueue::unbounded()),
        )
    }

    /// Create a UDP service draining the given queue.
    pub fn with_queue(
        name: impl Into<String>,
        config: UdpServiceConfig,
        _runtime: &Runtime,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        let shared = Arc::new(UdpShared {
            config: config.clone(),
            net: Arc::new(NetShared::new(config.net.clone())),
            socket: RwLock::new(None),
            endpoints: Mutex::new(HashMap::new()),
            datagram_handler: RwLock::new(None),
        });
        let recv_buf = vec![0u8; config.max_datagram_size.max(1) as usize];
        let driver = UdpDriver {
            config,
            shared: Arc::clone(&shared),
            recv_buf,
            since_sweep_ms: 0,
        };
        let service = Service::with_driver(name, queue, Box::new(driver));
        Self { service, shared }
    }

    // ========================================================================
    // Lifecycle (delegated to the service core)
    // ========================================================================

    pub fn init(&self) -> Result<()> {
        self.service.init()
    }

    pub fn start(&self) -> Result<()> {
        self.service.start()
    }

    pub fn stop(&self) -> Result<()> {
        self.service.stop()
    }

    pub fn wait(&self) -> Result<()> {
        self.service.wait()
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn state(&self) -> ServiceState {
        self.service.state()
    }

    pub fn is_running(&self) -> bool {
        self.service.is_running()
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn handle(&self) -> ServiceHandle {
        self.service.handle()
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    pub fn post(&self, msg: Box<dyn Message>) -> Result<()> {
        self.service.post(msg)
    }

    pub fn register_handler<F>(&self, category: u8, id: u16, handler: F) -> Result<()>
    where
        F: Fn(&dyn Message) + Send + Sync + 'static,
    {
        self.service.register_handler(category, id, handler)
    }

    pub fn register_module(&self, module: Box<dyn Module>) -> Result<()> {
        self.service.register_module(module)
    }

    /// Install the datagram handler; the core hands it every received
    /// datagram together with the endpoint's session.
    pub fn set_datagram_handler<F>(&self, handler: F)
    where
        F: Fn(&Arc<UdpSession>, &[u8]) + Send + Sync + 'static,
    {
        *self
            .shared
            .datagram_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Transmit raw bytes to an endpoint.
    pub fn send_to(&self, endpoint: SocketAddr, bytes: &[u8]) -> Result<usize> {
        self.shared.send_to(endpoint, bytes)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub fn set_session_handler(&self, handler: Arc<dyn SessionHandler>) {
        self.shared.net.set_handler(Some(handler));
    }

    pub fn session_registry(&self) -> SessionRegistry {
        SessionRegistry {
            shared: Arc::clone(&self.shared.net),
        }
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<dyn Session>> {
        self.shared.net.session(id)
    }

    pub fn sessions(&self) -> Vec<Arc<dyn Session>> {
        self.shared.net.sessions_snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.shared.net.session_count()
    }

    pub fn metrics(&self) -> &NetMetrics {
        self.shared.net.metrics()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.net.local_addr()
    }
}

/// Build the non-blocking datagram socket.
fn build_socket(config: &UdpServiceConfig) -> io::Result<UdpSocket> {
    let addr = SocketAddr::new(config.net.bind_address, config.net.port);
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(config.net.reuse_address)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

// ============================================================================
// Tests
// ============================================================================
