// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message identity, serialization contract and factory.
//!
//! A message is a value object identified by `(category, id)`. The pair
//! forms the dispatch key used by service handler tables and by the
//! wire framer. Messages are owned exclusively by the queue or handler
//! holding them; after dispatch the handler releases the message.
//!
//! Concrete message types implement [`Message`]; the serialization
//! contract defaults to `NotImplemented` so identity-only messages (and
//! factory fallbacks) are cheap to construct.

pub mod factory;
pub mod queue;

pub use factory::MessageFactory;

use crate::error::{Error, ErrorKind, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Message category type (high byte of the dispatch key).
pub type MessageCategory = u8;

/// Message id type (low half of the dispatch key).
pub type MessageId = u16;

/// Compute the dispatch key for a `(category, id)` pair.
///
/// The key is `category << 16 | id` and must be stable across
/// producer and consumer.
#[inline]
pub fn dispatch_key(category: MessageCategory, id: MessageId) -> u32 {
    (u32::from(category) << 16) | u32::from(id)
}

/// Milliseconds since the Unix epoch, used for enqueue timestamps.
pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Value object flowing through queues, handlers and sessions.
///
/// Object-safe so queues can hold `Box<dyn Message>`. `session_id` 0
/// means "not bound to a session"; `timestamp_ms` is stamped when the
/// message is posted into a service queue.
pub trait Message: Send {
    /// Message category (dispatch key high byte).
    fn category(&self) -> MessageCategory;

    /// Message id within the category.
    fn id(&self) -> MessageId;

    /// Owning session, 0 if unbound.
    fn session_id(&self) -> u32;

    fn set_session_id(&mut self, session_id: u32);

    /// Enqueue timestamp in ms since the Unix epoch (0 before posting).
    fn timestamp_ms(&self) -> u64;

    fn set_timestamp_ms(&mut self, timestamp_ms: u64);

    /// Type name for logs.
    fn name(&self) -> &str {
        "message"
    }

    /// Encode the message body. Identity (category/id/session) is *not*
    /// part of the body; the framer carries it in the header.
    fn serialize(&self) -> Result<Vec<u8>> {
        Err(Error::new(
            ErrorKind::NotImplemented,
            "serialize not implemented",
        ))
    }

    /// Decode the message body produced by [`Message::serialize`].
    fn deserialize(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::new(
            ErrorKind::NotImplemented,
            "deserialize not implemented",
        ))
    }

    /// One-line description for logs.
    fn describe(&self) -> String {
        format!(
            "{}[category={}, id={}, session_id={}, timestamp={}]",
            self.name(),
            self.category(),
            self.id(),
            self.session_id(),
            self.timestamp_ms()
        )
    }
}

/// Identity-only message.
///
/// Returned by [`MessageFactory::create`] for unregistered pairs: it
/// carries the wire identity but keeps the `NotImplemented`
/// serialization defaults, so a body destined for an unknown type is
/// reported as invalid rather than silently swallowed.
#[derive(Debug, Clone, Default)]
pub struct BaseMessage {
    category: MessageCategory,
    id: MessageId,
    session_id: u32,
    timestamp_ms: u64,
}

impl BaseMessage {
    pub fn new(category: MessageCategory, id: MessageId) -> Self {
        Self {
            category,
            id,
            session_id: 0,
            timestamp_ms: 0,
        }
    }
}

impl Message for BaseMessage {
    fn category(&self) -> MessageCategory {
        self.category
    }

    fn id(&self) -> MessageId {
        self.id
    }

    fn session_id(&self) -> u32 {
        self.session_id
    }

    fn set_session_id(&mut self, session_id: u32) {
        self.session_id = session_id;
    }

    fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    fn set_timestamp_ms(&mut self, timestamp_ms: u64) {
        self.timestamp_ms = timestamp_ms;
    }

    fn name(&self) -> &str {
        "base"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_key_layout() {
        assert_eq!(dispatch_key(0, 0), 0);
        assert_eq!(dispatch_key(1, 1), 0x0001_0001);
        assert_eq!(dispatch_key(0xFF, 0xFFFF), 0x00FF_FFFF);
        // id bits never leak into the category half
        assert_eq!(dispatch_key(2, 0xABCD) >> 16, 2);
    }

    #[test]
    fn test_base_message_identity() {
        let mut msg = BaseMessage::new(3, 7);
        assert_eq!(msg.category(), 3);
        assert_eq!(msg.id(), 7);
        assert_eq!(msg.session_id(), 0);
        msg.set_session_id(42);
        msg.set_timestamp_ms(1000);
        assert_eq!(msg.session_id(), 42);
        assert_eq!(msg.timestamp_ms(), 1000);
    }

    #[test]
    fn test_base_message_serialization_not_implemented() {
        let mut msg = BaseMessage::new(1, 1);
        assert_eq!(
            msg.serialize().unwrap_err().kind(),
            ErrorKind::NotImplemented
        );
        assert_eq!(
            msg.deserialize(b"abc").unwrap_err().kind(),
            ErrorKind::NotImplemented
        );
    }

    #[test]
    fn test_describe_contains_identity() {
        let msg = BaseMessage::new(5, 9);
        let text = msg.describe();
        assert!(text.contains("category=5"));
        assert!(text.contains("id=9"));
    }
}
