// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy and result carrier.
//!
//! Every fallible operation in the crate returns [`Result`]. The runtime
//! never propagates control via panics: callback panics are caught at
//! loop boundaries, logged and swallowed.

use std::fmt;
use std::io;

/// Closed set of error kinds understood by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Not an error. Present so status codes round-trip cleanly.
    Success,
    Unknown,
    NotImplemented,
    InvalidArgument,
    OutOfRange,

    /// Operating system / platform failure
    System,

    // Network
    Network,
    ConnectionFailed,
    ConnectionClosed,
    Timeout,

    // Message
    Message,
    InvalidMessage,
    MessageTooLarge,
    HandlerAlreadyRegistered,

    // Service
    Service,
    ServiceNotFound,
    ServiceAlreadyExists,
    ServiceNotStarted,
    ServiceAlreadyStarted,

    // Session
    Session,
    SessionNotFound,
    SessionAlreadyExists,
    SessionClosed,

    // Module
    Module,
    ModuleNotFound,
    ModuleAlreadyExists,
    ModuleInitFailed,
    CircularDependency,
}

impl ErrorKind {
    /// Stable human-readable text for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Success => "success",
            ErrorKind::Unknown => "unknown error",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::OutOfRange => "out of range",
            ErrorKind::System => "system error",
            ErrorKind::Network => "network error",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::ConnectionClosed => "connection closed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Message => "message error",
            ErrorKind::InvalidMessage => "invalid message",
            ErrorKind::MessageTooLarge => "message too large",
            ErrorKind::HandlerAlreadyRegistered => "handler already registered",
            ErrorKind::Service => "service error",
            ErrorKind::ServiceNotFound => "service not found",
            ErrorKind::ServiceAlreadyExists => "service already exists",
            ErrorKind::ServiceNotStarted => "service not started",
            ErrorKind::ServiceAlreadyStarted => "service already started",
            ErrorKind::Session => "session error",
            ErrorKind::SessionNotFound => "session not found",
            ErrorKind::SessionAlreadyExists => "session already exists",
            ErrorKind::SessionClosed => "session closed",
            ErrorKind::Module => "module error",
            ErrorKind::ModuleNotFound => "module not found",
            ErrorKind::ModuleAlreadyExists => "module already exists",
            ErrorKind::ModuleInitFailed => "module initialization failed",
            ErrorKind::CircularDependency => "circular dependency",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error value carried by [`Result`]: a kind plus a context message.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Create an error with a context message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create an error carrying only its kind text.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: String::new(),
        }
    }

    /// Wrap an I/O error under an explicit kind.
    pub fn io(kind: ErrorKind, err: &io::Error) -> Self {
        Self {
            kind,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.as_str())
        } else {
            write!(f, "{}: {}", self.kind.as_str(), self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionAborted => {
                ErrorKind::ConnectionFailed
            }
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorKind::ConnectionClosed,
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => ErrorKind::Network,
            _ => ErrorKind::System,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Tests
// ============================================================================
