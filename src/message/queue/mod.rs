// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message queue family.
//!
//! Four producer/consumer hand-off disciplines behind one object-safe
//! trait:
//!
//! | Variant | Discipline | Bounded |
//! |---------|------------|---------|
//! | [`DefaultMessageQueue`] | mutex + condvars, FIFO | optional |
//! | [`PriorityMessageQueue`] | mutex + condvars, max-heap | optional |
//! | [`SpscMessageQueue`] | lock-free ring, one producer / one consumer | always |
//! | [`MpmcMessageQueue`] | lock-free bounded ring (per-cell sequences) | always |
//!
//! Shared contract:
//! - after [`MessageQueue::shutdown`], `push` drops the message (one
//!   warning is logged) and pops return `None` once the queue drains;
//! - `len`/`is_empty` are exact for the mutex variants and advisory
//!   under concurrency for the lock-free ones.

mod default;
mod mpmc;
mod priority;
mod spsc;

pub use default::DefaultMessageQueue;
pub use mpmc::MpmcMessageQueue;
pub use priority::{PriorityFn, PriorityMessageQueue};
pub use spsc::SpscMessageQueue;

use super::Message;
use std::sync::Arc;
use std::time::Duration;

/// Producer/consumer hand-off for boxed messages.
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message. After shutdown this is a no-op (the message
    /// is dropped); a bounded queue may block until space frees.
    fn push(&self, msg: Box<dyn Message>);

    /// Dequeue, blocking until a message is available or the queue is
    /// shut down and drained.
    fn pop(&self) -> Option<Box<dyn Message>>;

    /// Dequeue without blocking.
    fn try_pop(&self) -> Option<Box<dyn Message>>;

    /// Dequeue, waiting up to `timeout`.
    fn wait_pop(&self, timeout: Duration) -> Option<Box<dyn Message>>;

    /// Number of queued messages (advisory for lock-free variants).
    fn len(&self) -> usize;

    /// Whether the queue is empty (advisory for lock-free variants).
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all queued messages.
    fn clear(&self);

    /// Shut the queue down: unblocks waiters, drops future pushes.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

/// Queue variant selector for [`create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Default,
    Priority,
    Spsc,
    Mpmc,
}

/// Build a queue of the given kind.
///
/// `capacity` bounds the queue; for `Default` and `Priority` a capacity
/// of 0 means unbounded. The lock-free variants require a non-zero
/// capacity and fall back to a small default when given 0.
pub fn create(kind: QueueKind, capacity: usize) -> Arc<dyn MessageQueue> {
    const FALLBACK_RING_CAPACITY: usize = 1024;
    match kind {
        QueueKind::Default => Arc::new(DefaultMessageQueue::new(capacity)),
        QueueKind::Priority => Arc::new(PriorityMessageQueue::new(capacity)),
        QueueKind::Spsc => {
            let capacity = ring_capacity(kind, capacity, FALLBACK_RING_CAPACITY);
            Arc::new(SpscMessageQueue::new(capacity))
        }
        QueueKind::Mpmc => {
            let capacity = ring_capacity(kind, capacity, FALLBACK_RING_CAPACITY);
            Arc::new(MpmcMessageQueue::new(capacity))
        }
    }
}

fn ring_capacity(kind: QueueKind, capacity: usize, fallback: usize) -> usize {
    if capacity == 0 {
        log::warn!(
            "[QUEUE] {:?} queue requires a capacity, using {}",
            kind,
            fallback
        );
        fallback
    } else {
        capacity
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use crate::error::Result;
    use crate::message::Message;

    /// Minimal payload-bearing message used across the queue tests.
    #[derive(Debug)]
    pub struct TestMessage {
        pub category: u8,
        pub id: u16,
        pub session_id: u32,
        pub timestamp_ms: u64,
        pub value: u64,
    }

    impl TestMessage {
        pub fn new(category: u8, value: u64) -> Self {
            Self {
                category,
                id: 0,
                session_id: 0,
                timestamp_ms: 0,
                value,
            }
        }
    }

    impl Message for TestMessage {
        fn category(&self) -> u8 {
            self.category
        }
        fn id(&self) -> u16 {
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
            "test"
        }
        fn serialize(&self) -> Result<Vec<u8>> {
            Ok(self.value.to_le_bytes().to_vec())
        }
    }

    /// Downcast helper: queue tests read the value back out of the
    /// serialized body to avoid `Any` plumbing on the Message trait.
    pub fn value_of(msg: &dyn Message) -> u64 {
        let body = msg.serialize().expect("test message serializes");
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&body);
        u64::from_le_bytes(bytes)
    }
}
