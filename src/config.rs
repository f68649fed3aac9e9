// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration types for servers and network services.
//!
//! All configs are plain values with [`Default`] impls and `with_*`
//! builder helpers:
//!
//! ```
//! use netsvc::config::TcpServiceConfig;
//!
//! let config = TcpServiceConfig::default()
//!     .with_port(9000)
//!     .with_idle_timeout_ms(30_000)
//!     .with_io_threads(2);
//! assert_eq!(config.net.port, 9000);
//! ```

use std::net::{IpAddr, Ipv4Addr};

/// Library-level server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Human-readable server name (used in logs and thread names)
    pub server_name: String,

    /// Address the server binds to
    pub ip: IpAddr,

    /// Listen port
    pub port: u16,

    /// Maximum simultaneous connections across the server
    pub max_connections: u32,

    /// Worker thread pool size
    pub thread_pool_size: u32,

    /// Capacity for bounded service queues (0 = unbounded)
    pub message_queue_size: usize,

    /// Enable connection/message counters
    pub enable_monitoring: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "netsvc-server".to_string(),
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8888,
            max_connections: 10_000,
            thread_pool_size: 4,
            message_queue_size: 10_000,
            enable_monitoring: true,
        }
    }
}

impl ServerConfig {
    /// Builder: set server name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Builder: set bind address and port.
    pub fn with_endpoint(mut self, ip: IpAddr, port: u16) -> Self {
        self.ip = ip;
        self.port = port;
        self
    }
}

/// Configuration shared by TCP and UDP network services.
#[derive(Clone, Debug)]
pub struct NetServiceConfig {
    /// Address to bind (default: all interfaces)
    pub bind_address: IpAddr,

    /// Port to bind (0 = ephemeral port assigned by the OS)
    pub port: u16,

    /// Maximum simultaneous sessions; new connections beyond the limit
    /// are refused
    pub max_connections: u32,

    /// Read buffer size; also the maximum accepted frame body size
    pub read_buffer_size: u32,

    /// Write buffer size hint
    pub write_buffer_size: u32,

    /// Idle timeout for the sweep; 0 disables idle eviction
    pub idle_timeout_ms: u64,

    /// Set SO_REUSEADDR on the listening/bound socket
    pub reuse_address: bool,

    /// Set TCP_NODELAY on accepted sockets
    pub tcp_no_delay: bool,

    /// Set SO_KEEPALIVE on accepted sockets
    pub keep_alive: bool,
}

impl Default for NetServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            max_connections: 1000,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            idle_timeout_ms: 60_000,
            reuse_address: true,
            tcp_no_delay: true,
            keep_alive: true,
        }
    }
}

/// TCP service configuration.
#[derive(Clone, Debug)]
pub struct TcpServiceConfig {
    /// Shared network service settings
    pub net: NetServiceConfig,

    /// Number of reactor threads (reactor 0 owns the acceptor)
    pub io_thread_count: u32,

    /// Listen backlog
    pub accept_backlog: u32,

    /// SO_SNDBUF for accepted sockets (0 = OS default)
    pub socket_send_buffer_size: u32,

    /// SO_RCVBUF for accepted sockets (0 = OS default)
    pub socket_recv_buffer_size: u32,
}

impl Default for TcpServiceConfig {
    fn default() -> Self {
        Self {
            net: NetServiceConfig::default(),
            io_thread_count: 1,
            accept_backlog: 128,
            socket_send_buffer_size: 8192,
            socket_recv_buffer_size: 8192,
        }
    }
}

impl TcpServiceConfig {
    /// Create a config listening on the given port.
    pub fn listen(port: u16) -> Self {
        Self::default().with_port(port)
    }

    /// Builder: set listen port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.net.port = port;
        self
    }

    /// Builder: set bind address.
    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.net.bind_address = addr;
        self
    }

    /// Builder: set idle timeout (0 disables the sweep).
    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.net.idle_timeout_ms = timeout_ms;
        self
    }

    /// Builder: set reactor thread count (clamped to at least 1).
    pub fn with_io_threads(mut self, count: u32) -> Self {
        self.io_thread_count = count.max(1);
        self
    }

    /// Builder: set the maximum accepted frame body size.
    pub fn with_read_buffer_size(mut self, size: u32) -> Self {
        self.net.read_buffer_size = size;
        self
    }

    /// Effective reactor count (the zero value means one reactor).
    pub fn reactor_count(&self) -> usize {
        self.io_thread_count.max(1) as usize
    }
}

/// UDP service configuration.
#[derive(Clone, Debug)]
pub struct UdpServiceConfig {
    /// Shared network service settings
    pub net: NetServiceConfig,

    /// Maximum datagram size accepted by the receive loop
    pub max_datagram_size: u32,

    /// Inactivity timeout after which a synthesized session is evicted
    pub session_timeout_ms: u64,
}

impl Default for UdpServiceConfig {
    fn default() -> Self {
        Self {
            net: NetServiceConfig::default(),
            max_datagram_size: 4096,
            session_timeout_ms: 60_000,
        }
    }
}

impl UdpServiceConfig {
    /// Create a config bound to the given port.
    pub fn bind(port: u16) -> Self {
        let mut config = Self::default();
        config.net.port = port;
        config
    }

    /// Builder: set bind address.
    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.net.bind_address = addr;
        self
    }

    /// Builder: set session eviction timeout.
    pub fn with_session_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.session_timeout_ms = timeout_ms;
        self
    }

    /// Builder: set maximum datagram size.
    pub fn with_max_datagram_size(mut self, size: u32) -> Self {
        self.max_datagram_size = size;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
