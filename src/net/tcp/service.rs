// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP network service: acceptor + reactor pool over the service core.
//!
//! `start()` binds the listener, spawns the reactor pool and the
//! service worker. Frames decoded by the reactors are rebuilt into
//! typed messages and posted into this service's queue, where the
//! worker dispatches them by `(category, id)`.

use super::io_thread::{IoContext, ReactorPool};
use crate::config::TcpServiceConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::message::queue::{DefaultMessageQueue, MessageQueue};
use crate::message::Message;
use crate::net::shared::NetShared;
use crate::net::{NetMetrics, Session, SessionHandler, SessionId, SessionRegistry};
use crate::runtime::Runtime;
use crate::service::{Module, Service, ServiceDriver, ServiceHandle, ServiceState};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// Driver wiring the reactor pool into the service lifecycle.
struct TcpDriver {
    config: TcpServiceConfig,
    shared: Arc<NetShared>,
    ctx_template: Option<Arc<IoContext>>,
    pool: Option<ReactorPool>,
}

impl ServiceDriver for TcpDriver {
    fn on_start(&mut self) -> Result<()> {
        let listener = build_listener(&self.config).map_err(|err| {
            Error::new(
                ErrorKind::Network,
                format!(
                    "failed to bind {}:{}: {}",
                    self.config.net.bind_address, self.config.net.port, err
                ),
            )
        })?;
        let local_addr = listener.local_addr().ok();
        self.shared.set_local_addr(local_addr);

        let ctx = self.ctx_template.take().ok_or_else(|| {
            Error::new(ErrorKind::Service, "TCP service cannot be restarted")
        })?;
        let pool = ReactorPool::spawn(listener, ctx).map_err(|err| {
            Error::new(
                ErrorKind::Network,
                format!("failed to spawn reactors: {}", err),
            )
        })?;
        self.pool = Some(pool);

        if let Some(addr) = local_addr {
            log::info!("[TCP] listening on {}", addr);
        }
        Ok(())
    }

    fn on_stop(&mut self) -> Result<()> {
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
        // Reactor teardown closes its connections; catch any session
        // that never reached a reactor
        self.shared.close_all_sessions();
        self.shared.set_local_addr(None);
        Ok(())
    }

    fn on_update(&mut self, _elapsed_ms: u64) -> Result<()> {
        self.shared.idle_sweep();
        Ok(())
    }
}

/// TCP service: framed message protocol over accepted connections.
pub struct TcpService {
    service: Service,
    shared: Arc<NetShared>,
}

impl TcpService {
    /// Create a TCP service with an unbounded default queue.
    pub fn new(name: impl Into<String>, config: TcpServiceConfig, runtime: &Runtime) -> Self {
        Self::with_queue(
            name,
            config,
            runtime,
            Arc::new(DefaultMessageQueue::unbounded()),
        )
    }

    /// Create a TCP service draining the given queue.
    pub fn with_queue(
        name: impl Into<String>,
        config: TcpServiceConfig,
        runtime: &Runtime,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        let shared = Arc::new(NetShared::new(config.net.clone()));
        let ctx = Arc::new(IoContext {
            shared: Arc::clone(&shared),
            factory: Arc::clone(runtime.factory()),
            queue: Arc::clone(&queue),
            config: config.clone(),
        });
        let driver = TcpDriver {
            config,
            shared: Arc::clone(&shared),
            ctx_template: Some(ctx),
            pool: None,
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

    /// The underlying service core (queue, modules, dispatch).
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

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Install the session event handler (set this before `start()` to
    /// observe the first connections).
    pub fn set_session_handler(&self, handler: Arc<dyn SessionHandler>) {
        self.shared.set_handler(Some(handler));
    }

    /// Cloneable view of the session table, for reply-from-handler
    /// patterns.
    pub fn session_registry(&self) -> SessionRegistry {
        SessionRegistry {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<dyn Session>> {
        self.shared.session(id)
    }

    pub fn sessions(&self) -> Vec<Arc<dyn Session>> {
        self.shared.sessions_snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.shared.session_count()
    }

    pub fn metrics(&self) -> &NetMetrics {
        self.shared.metrics()
    }

    /// Bound address once running (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr()
    }
}

/// Build the non-blocking listener with the configured socket options.
fn build_listener(config: &TcpServiceConfig) -> io::Result<std::net::TcpListener> {
    let addr = SocketAddr::new(config.net.bind_address, config.net.port);
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(config.net.reuse_address)?;
    if config.socket_recv_buffer_size > 0 {
        socket.set_recv_buffer_size(config.socket_recv_buffer_size as usize)?;
    }
    if config.socket_send_buffer_size > 0 {
        socket.set_send_buffer_size(config.socket_send_buffer_size as usize)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(config.accept_backlog.max(1) as i32)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

// ============================================================================
// Tests
// ============================================================================
