// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # netsvc - Server-side service runtime
//!
//! A runtime for long-lived *services*, each owning a thread-bound
//! message loop over a pluggable queue, dispatching typed messages to
//! `(category, id)` handlers, hosting plug-in *modules*, driving TCP and
//! UDP I/O with per-connection *sessions*, and scheduling one-shot or
//! repeating timers grouped for bulk cancellation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netsvc::config::TcpServiceConfig;
//! use netsvc::net::TcpService;
//! use netsvc::runtime::Runtime;
//!
//! fn main() -> netsvc::Result<()> {
//!     let runtime = Runtime::new();
//!
//!     let server = TcpService::new("echo", TcpServiceConfig::listen(9000), &runtime);
//!     let sessions = server.session_registry();
//!     server.register_handler(1, 1, move |msg| {
//!         if let Some(session) = sessions.get(msg.session_id()) {
//!             let _ = session.send(msg);
//!         }
//!     })?;
//!
//!     server.init()?;
//!     server.start()?;
//!     server.wait()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Application                           |
//! |      handlers ((category, id) -> fn)  |  modules  |  timers  |
//! +--------------------------------------------------------------+
//! |                       Service core                           |
//! |   one worker thread per service: queue drain + update tick   |
//! +--------------------------------------------------------------+
//! |                      Message queues                          |
//! |      default FIFO | priority | SPSC ring | MPMC ring         |
//! +--------------------------------------------------------------+
//! |                     Network services                         |
//! |   TCP: mio reactor pool, framed    UDP: cooperative poll,    |
//! |   reads, queued writes             endpoint -> session demux |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`runtime::Runtime`] | Shared collaborators: timer scheduler + message factory |
//! | [`service::Service`] | Lifecycle, worker loop, handler table, modules |
//! | [`net::TcpService`] | Accepted connections carrying the framed protocol |
//! | [`net::UdpService`] | Datagram demux with endpoint-synthesized sessions |
//! | [`timer::TimerScheduler`] | One-shot/repeating timers with groups |
//! | [`message::MessageFactory`] | `(category, id)` to constructor registry |
//!
//! ## Modules Overview
//!
//! - [`service`] - service core and modules (start here)
//! - [`message`] - message trait, factory and the queue family
//! - [`net`] - TCP/UDP services, sessions, wire framing
//! - [`timer`] - timer scheduler and groups
//! - [`config`] - configuration types
//! - [`error`] - error taxonomy
//!
//! Logging goes through the [`log`] facade; the crate never installs a
//! logger.

/// Configuration types for servers and network services.
pub mod config;
/// Error taxonomy and result carrier.
pub mod error;
/// Message identity, serialization contract, factory and queues.
pub mod message;
/// TCP/UDP network services, sessions and wire framing.
pub mod net;
/// Process runtime (timer scheduler + message factory).
pub mod runtime;
/// Service core: lifecycle, message loop, handler table, modules.
pub mod service;
/// Timer scheduling with groups.
pub mod timer;

pub use config::{NetServiceConfig, ServerConfig, TcpServiceConfig, UdpServiceConfig};
pub use error::{Error, ErrorKind, Result};
pub use message::queue::{
    DefaultMessageQueue, MessageQueue, MpmcMessageQueue, PriorityMessageQueue, QueueKind,
    SpscMessageQueue,
};
pub use message::{BaseMessage, Message, MessageFactory};
pub use net::{
    Session, SessionHandler, SessionId, SessionRegistry, SessionState, TcpService, UdpService,
    UdpSession,
};
pub use runtime::Runtime;
pub use service::{Module, Service, ServiceDriver, ServiceHandle, ServiceState};
pub use timer::{TimerGroupId, TimerId, TimerScheduler};
