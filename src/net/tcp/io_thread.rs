// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reactor threads for the TCP service.
//!
//! Each reactor owns a mio `Poll` multiplexing its share of the
//! connections; reactor 0 additionally owns the acceptor. Commands
//! (register, send, close, shutdown) arrive over a channel paired with
//! a `Waker`; accepted connections are distributed round-robin across
//! the pool.
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                       reactor thread                          |
//! |  +--------------------------------------------------------+  |
//! |  |                     mio::Poll                          |  |
//! |  |  - TCP listener (reactor 0 only)                       |  |
//! |  |  - TCP streams (framed read / queued write)            |  |
//! |  |  - Waker (command channel)                             |  |
//! |  +--------------------------------------------------------+  |
//! |        | frames                      | session events        |
//! |        v                             v                       |
//! |   MessageFactory -> service queue    SessionHandler          |
//! +--------------------------------------------------------------+
//! ```

use super::session::TcpSession;
use crate::config::TcpServiceConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::message::queue::MessageQueue;
use crate::message::{unix_time_ms, MessageFactory};
use crate::net::frame::{Frame, FrameCodec, FrameError, FRAME_HEADER_SIZE};
use crate::net::shared::NetShared;
use crate::net::{Session, SessionState};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const CONNECTION_TOKEN_START: usize = 2;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_EVENTS: usize = 128;

/// Commands sent to a reactor.
pub(crate) enum IoCommand {
    /// Adopt an accepted connection
    Register {
        session: Arc<TcpSession>,
        stream: TcpStream,
    },

    /// Queue a framed buffer for write
    Send {
        session_id: crate::net::SessionId,
        frame: Vec<u8>,
    },

    /// Close a connection
    Close { session_id: crate::net::SessionId },

    /// Stop the whole pool
    Shutdown,
}

/// Cheap handle to one reactor; cloned into every session it owns.
#[derive(Clone)]
pub(crate) struct IoHandle {
    cmd_tx: Sender<IoCommand>,
    waker: Arc<Waker>,
}

impl IoHandle {
    fn send_command(&self, cmd: IoCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| {
            Error::new(ErrorKind::ConnectionClosed, "reactor stopped")
        })?;
        if let Err(err) = self.waker.wake() {
            log::warn!("[TCP] reactor wake failed: {}", err);
        }
        Ok(())
    }

    pub(crate) fn send_frame(
        &self,
        session_id: crate::net::SessionId,
        frame: Vec<u8>,
    ) -> Result<()> {
        self.send_command(IoCommand::Send { session_id, frame })
    }

    pub(crate) fn close(&self, session_id: crate::net::SessionId) -> Result<()> {
        self.send_command(IoCommand::Close { session_id })
    }

    pub(crate) fn register(&self, session: Arc<TcpSession>, stream: TcpStream) -> Result<()> {
        self.send_command(IoCommand::Register { session, stream })
    }
}

/// Everything a reactor needs to turn frames into queued messages.
pub(crate) struct IoContext {
    pub(crate) shared: Arc<NetShared>,
    pub(crate) factory: Arc<MessageFactory>,
    pub(crate) queue: Arc<dyn MessageQueue>,
    pub(crate) config: TcpServiceConfig,
}

/// Reactor pool: `io_thread_count` reactors sharing one running flag.
pub(crate) struct ReactorPool {
    handles: Arc<Vec<IoHandle>>,
    threads: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl ReactorPool {
    /// Spawn the reactors; reactor 0 adopts the listener.
    pub(crate) fn spawn(
        listener: std::net::TcpListener,
        ctx: Arc<IoContext>,
    ) -> io::Result<Self> {
        let count = ctx.config.reactor_count();
        let running = Arc::new(AtomicBool::new(true));
        let next_reactor = Arc::new(AtomicUsize::new(0));

        let mut polls: Vec<Poll> = Vec::with_capacity(count);
        let mut receivers: Vec<Receiver<IoCommand>> = Vec::with_capacity(count);
        let mut handles: Vec<IoHandle> = Vec::with_capacity(count);

        for _ in 0..count {
            let poll = Poll::new()?;
            let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
            let (cmd_tx, cmd_rx) = channel::unbounded();
            handles.push(IoHandle { cmd_tx, waker });
            polls.push(poll);
            receivers.push(cmd_rx);
        }

        let mut mio_listener = TcpListener::from_std(listener);
        polls[0]
            .registry()
            .register(&mut mio_listener, LISTENER_TOKEN, Interest::READABLE)?;

        let handles = Arc::new(handles);
        let mut threads = Vec::with_capacity(count);
        let mut listener = Some(mio_listener);

        for (index, (poll, cmd_rx)) in polls.into_iter().zip(receivers).enumerate() {
            let reactor = Reactor {
                index,
                poll,
                listener: listener.take(),
                conns: HashMap::new(),
                tokens: HashMap::new(),
                next_token: CONNECTION_TOKEN_START,
                cmd_rx,
                running: Arc::clone(&running),
                ctx: Arc::clone(&ctx),
                handles: Arc::clone(&handles),
                next_reactor: Arc::clone(&next_reactor),
            };
            let thread = thread::Builder::new()
                .name(format!("netsvc-tcp-io-{}", index))
                .spawn(move || reactor.run())?;
            threads.push(thread);
        }

        Ok(Self {
            handles,
            threads,
            running,
        })
    }

    /// Stop every reactor and join the threads. Idempotent.
    pub(crate) fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        for handle in self.handles.iter() {
            let _ = handle.cmd_tx.send(IoCommand::Shutdown);
            let _ = handle.waker.wake();
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                log::error!("[TCP] reactor thread panicked");
            }
        }
    }
}

impl Drop for ReactorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Per-connection reactor state.
struct Conn {
    stream: TcpStream,
    session: Arc<TcpSession>,
    codec: FrameCodec,
    write_queue: VecDeque<Vec<u8>>,
    write_offset: usize,
    writable_interest: bool,
}

enum ReadOutcome {
    Done,
    Closed(&'static str),
    Failed(Error),
}

struct Reactor {
    index: usize,
    poll: Poll,
    listener: Option<TcpListener>,
    conns: HashMap<Token, Conn>,
    tokens: HashMap<crate::net::SessionId, Token>,
    next_token: usize,
    cmd_rx: Receiver<IoCommand>,
    running: Arc<AtomicBool>,
    ctx: Arc<IoContext>,
    handles: Arc<Vec<IoHandle>>,
    next_reactor: Arc<AtomicUsize>,
}

impl Reactor {
    fn run(mut self) {
        log::debug!("[TCP] reactor {} started", self.index);
        let mut events = Events::with_capacity(MAX_EVENTS);

        while self.running.load(Ordering::Relaxed) {
            if let Err(err) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("[TCP] reactor {} poll: {}", self.index, err);
                continue;
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_ready(),
                    WAKER_TOKEN => {} // commands drained below
                    token => {
                        if event.is_readable() {
                            self.handle_readable(token);
                        }
                        if event.is_writable() {
                            self.handle_writable(token);
                        }
                    }
                }
            }

            self.drain_commands();
        }

        // Teardown: every surviving connection closes, removal fires
        // on_closed through the shared table
        let tokens: Vec<Token> = self.conns.keys().copied().collect();
        for token in tokens {
            self.close_conn(token, "reactor shutdown", None);
        }
        log::debug!("[TCP] reactor {} stopped", self.index);
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn drain_commands(&mut self) {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(IoCommand::Register { session, stream }) => {
                    self.register_conn(session, stream);
                }
                Ok(IoCommand::Send { session_id, frame }) => {
                    self.queue_write(session_id, frame);
                }
                Ok(IoCommand::Close { session_id }) => {
                    if let Some(token) = self.tokens.get(&session_id).copied() {
                        self.close_conn(token, "closed by request", None);
                    }
                }
                Ok(IoCommand::Shutdown) => {
                    self.running.store(false, Ordering::Relaxed);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
    }

    fn register_conn(&mut self, session: Arc<TcpSession>, mut stream: TcpStream) {
        let token = Token(self.next_token);
        self.next_token += 1;

        if let Err(err) =
            self.poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)
        {
            log::error!(
                "[TCP] reactor {} failed to register session {}: {}",
                self.index,
                session.id(),
                err
            );
            session.mark_disconnected();
            self.ctx.shared.remove_session(session.id());
            return;
        }

        session.set_state(SessionState::Connected);
        session.touch();
        self.tokens.insert(session.id(), token);
        let read_limit = self.ctx.config.net.read_buffer_size as usize;
        self.conns.insert(
            token,
            Conn {
                stream,
                session: Arc::clone(&session),
                codec: FrameCodec::new(read_limit),
                write_queue: VecDeque::new(),
                write_offset: 0,
                writable_interest: false,
            },
        );

        log::debug!(
            "[TCP] reactor {} session {} opened ({})",
            self.index,
            session.id(),
            session.remote_addr()
        );
        if let Some(handler) = self.ctx.shared.handler() {
            handler.on_opened(session.as_ref());
        }
    }

    fn queue_write(&mut self, session_id: crate::net::SessionId, frame: Vec<u8>) {
        let Some(token) = self.tokens.get(&session_id).copied() else {
            log::debug!(
                "[TCP] write to unknown session {}, dropped",
                session_id
            );
            return;
        };
        if let Some(conn) = self.conns.get_mut(&token) {
            conn.write_queue.push_back(frame);
        }
        self.try_flush(token);
    }

    // ========================================================================
    // Accept
    // ========================================================================

    fn accept_ready(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, remote_addr)) => {
                    let max = self.ctx.config.net.max_connections as usize;
                    if self.ctx.shared.session_count() >= max {
                        log::warn!(
                            "[TCP] connection limit {} reached, refusing {}",
                            max,
                            remote_addr
                        );
                        continue; // stream drops, connection resets
                    }

                    if let Err(err) = configure_stream(&stream, &self.ctx.config) {
                        log::warn!("[TCP] socket options for {}: {}", remote_addr, err);
                    }

                    let id = self.ctx.shared.next_session_id();
                    let index =
                        self.next_reactor.fetch_add(1, Ordering::Relaxed) % self.handles.len();
                    let handle = self.handles[index].clone();
                    let session = Arc::new(TcpSession::new(
                        id,
                        remote_addr,
                        handle.clone(),
                        Arc::downgrade(&self.ctx.shared),
                    ));

                    if let Err(err) = self
                        .ctx
                        .shared
                        .add_session(Arc::clone(&session) as Arc<dyn Session>)
                    {
                        log::error!("[TCP] failed to add session {}: {}", id, err);
                        continue;
                    }
                    if let Err(err) = handle.register(session, stream) {
                        log::error!("[TCP] failed to hand off session {}: {}", id, err);
                        self.ctx.shared.remove_session(id);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    // Transient accept failure: log and re-arm
                    log::error!("[TCP] accept: {}", err);
                    break;
                }
            }
        }
    }

    // ========================================================================
    // Read
    // ========================================================================

    fn handle_readable(&mut self, token: Token) {
        let ctx = Arc::clone(&self.ctx);
        let outcome = {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };
            read_frames(&ctx, conn)
        };

        match outcome {
            ReadOutcome::Done => {}
            ReadOutcome::Closed(reason) => self.close_conn(token, reason, None),
            ReadOutcome::Failed(err) => {
                log::warn!("[TCP] read error: {}", err);
                self.close_conn(token, "read error", Some(err));
            }
        }
    }

    // ========================================================================
    // Write
    // ========================================================================

    fn handle_writable(&mut self, token: Token) {
        self.try_flush(token);
    }

    fn try_flush(&mut self, token: Token) {
        let mut failure: Option<Error> = None;
        {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };

            while let Some(front) = conn.write_queue.front() {
                match conn.stream.write(&front[conn.write_offset..]) {
                    Ok(0) => {
                        failure = Some(Error::new(
                            ErrorKind::ConnectionClosed,
                            "write returned zero",
                        ));
                        break;
                    }
                    Ok(n) => {
                        conn.write_offset += n;
                        if conn.write_offset >= front.len() {
                            conn.write_queue.pop_front();
                            conn.write_offset = 0;
                            conn.session.touch();
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        failure = Some(Error::io(ErrorKind::Network, &err));
                        break;
                    }
                }
            }

            if failure.is_none() {
                // Track WRITABLE interest only while a backlog exists
                let want = !conn.write_queue.is_empty();
                if want != conn.writable_interest {
                    conn.writable_interest = want;
                    let interest = if want {
                        Interest::READABLE | Interest::WRITABLE
                    } else {
                        Interest::READABLE
                    };
                    if let Err(err) =
                        self.poll
                            .registry()
                            .reregister(&mut conn.stream, token, interest)
                    {
                        failure = Some(Error::io(ErrorKind::Network, &err));
                    }
                }
            }
        }

        if let Some(err) = failure {
            log::warn!("[TCP] write error: {}", err);
            self.close_conn(token, "write error", Some(err));
        }
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Tear a connection down: deregister, shut the socket both ways,
    /// mark the session disconnected and remove it from the table.
    fn close_conn(&mut self, token: Token, reason: &str, error: Option<Error>) {
        let Some(mut conn) = self.conns.remove(&token) else {
            return;
        };
        self.tokens.remove(&conn.session.id());
        let _ = self.poll.registry().deregister(&mut conn.stream);

        if let Some(err) = error {
            self.ctx.shared.notify_error(conn.session.as_ref(), &err);
        }

        let _ = conn.stream.shutdown(Shutdown::Both);
        conn.session.mark_disconnected();
        if self.ctx.shared.remove_session(conn.session.id()).is_some() {
            log::debug!(
                "[TCP] reactor {} session {} closed ({})",
                self.index,
                conn.session.id(),
                reason
            );
        }
    }
}

/// Drain every complete frame currently readable on the connection.
fn read_frames(ctx: &IoContext, conn: &mut Conn) -> ReadOutcome {
    loop {
        match conn.codec.decode(&mut conn.stream) {
            Ok(Some(frame)) => deliver(ctx, &conn.session, frame),
            Ok(None) => return ReadOutcome::Done,
            Err(FrameError::TooLarge { body_len, max }) => {
                return ReadOutcome::Failed(Error::new(
                    ErrorKind::MessageTooLarge,
                    format!("body {} bytes exceeds limit {}", body_len, max),
                ));
            }
            Err(FrameError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return ReadOutcome::Closed("peer closed");
            }
            Err(FrameError::Io(err)) if err.kind() == io::ErrorKind::ConnectionReset => {
                return ReadOutcome::Closed("connection reset");
            }
            Err(FrameError::Io(err)) => {
                return ReadOutcome::Failed(Error::io(ErrorKind::Network, &err));
            }
        }
    }
}

/// Rebuild the typed message and post it into the owning service.
///
/// A body that fails to deserialize is logged and skipped; framing is
/// preserved and the session survives.
fn deliver(ctx: &IoContext, session: &Arc<TcpSession>, frame: Frame) {
    session.touch();

    let mut msg = ctx.factory.create(frame.category, frame.id);
    msg.set_session_id(session.id());
    if !frame.body.is_empty() {
        if let Err(err) = msg.deserialize(&frame.body) {
            log::warn!(
                "[TCP] session {} invalid message category={} id={}: {}",
                session.id(),
                frame.category,
                frame.id,
                err
            );
            return;
        }
    }

    ctx.shared
        .metrics()
        .record_received(FRAME_HEADER_SIZE + frame.body.len());
    msg.set_timestamp_ms(unix_time_ms());

    if let Some(handler) = ctx.shared.handler() {
        handler.on_message_received(session.as_ref(), msg.as_ref());
    }

    ctx.queue.push(msg);
}

/// Apply per-connection socket options from the config.
fn configure_stream(stream: &TcpStream, config: &TcpServiceConfig) -> io::Result<()> {
    let sock = socket2::SockRef::from(stream);
    sock.set_nodelay(config.net.tcp_no_delay)?;
    sock.set_keepalive(config.net.keep_alive)?;
    if config.socket_send_buffer_size > 0 {
        sock.set_send_buffer_size(config.socket_send_buffer_size as usize)?;
    }
    if config.socket_recv_buffer_size > 0 {
        sock.set_recv_buffer_size(config.socket_recv_buffer_size as usize)?;
    }
    Ok(())
}
