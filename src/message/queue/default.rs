// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Default FIFO message queue (mutex + condition variables).
//!
//! Optionally bounded: with `max_len > 0` a full queue blocks producers
//! on `not_full` until a consumer frees space or the queue shuts down.
//! With `max_len == 0` the queue is unbounded and `not_full` is unused.

use super::MessageQueue;
use crate::message::Message;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct Inner {
    queue: VecDeque<Box<dyn Message>>,
    shutdown: bool,
    drop_logged: bool,
}

/// FIFO queue guarded by a single mutex.
pub struct DefaultMessageQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    max_len: usize,
}

impl DefaultMessageQueue {
    /// Create a queue; `max_len == 0` means unbounded.
    pub fn new(max_len: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                shutdown: false,
                drop_logged: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            max_len,
        }
    }

    /// Create an unbounded queue.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bounded(&self) -> bool {
        self.max_len > 0
    }

    fn log_dropped(inner: &mut Inner) {
        if !inner.drop_logged {
            inner.drop_logged = true;
            log::warn!("[QUEUE] push to shutdown queue, message dropped");
        }
    }
}

impl MessageQueue for DefaultMessageQueue {
    fn push(&self, msg: Box<dyn Message>) {
        let mut inner = self.lock();
        if inner.shutdown {
            Self::log_dropped(&mut inner);
            return;
        }

        if self.bounded() && inner.queue.len() >= self.max_len {
            log::warn!("[QUEUE] queue full ({}), producer waiting", self.max_len);
            while inner.queue.len() >= self.max_len && !inner.shutdown {
                inner = self
                    .not_full
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if inner.shutdown {
                Self::log_dropped(&mut inner);
                return;
            }
        }

        inner.queue.push_back(msg);
        drop(inner);
        self.not_empty.notify_one();
    }

    fn pop(&self) -> Option<Box<dyn Message>> {
        let mut inner = self.lock();
        while inner.queue.is_empty() && !inner.shutdown {
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let msg = inner.queue.pop_front()?;
        drop(inner);
        if self.bounded() {
            self.not_full.notify_one();
        }
        Some(msg)
    }

    fn try_pop(&self) -> Option<Box<dyn Message>> {
        let mut inner = self.lock();
        let msg = inner.queue.pop_front()?;
        drop(inner);
        if self.bounded() {
            self.not_full.notify_one();
        }
        Some(msg)
    }

    fn wait_pop(&self, timeout: Duration) -> Option<Box<dyn Message>> {
        let inner = self.lock();
        let (mut inner, _timed_out) = self
            .not_empty
            .wait_timeout_while(inner, timeout, |inner| {
                inner.queue.is_empty() && !inner.shutdown
            })
            .unwrap_or_else(PoisonError::into_inner);
        let msg = inner.queue.pop_front()?;
        drop(inner);
        if self.bounded() {
            self.not_full.notify_one();
        }
        Some(msg)
    }

    fn len(&self) -> usize {
        self.lock().queue.len()
    }

    fn clear(&self) {
        let mut inner = self.lock();
        inner.queue.clear();
        drop(inner);
        if self.bounded() {
            self.not_full.notify_all();
        }
    }

    fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shutdown = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::testing::{value_of, TestMessage};
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = DefaultMessageQueue::unbounded();
        for i in 0..5u64 {
            q.push(Box::new(TestMessage::new(1, i)));
        }
        for i in 0..5u64 {
            let msg = q.try_pop().expect("message queued");
            assert_eq!(value_of(&*msg), i);
        }
        assert!(q.try_pop().is_none());
    }

    // The multiset delivered equals the multiset enqueued.
    #[test]
    fn test_delivery_preserves_multiset() {
        let q = Arc::new(DefaultMessageQueue::unbounded());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..1000u64 {
                    q.push(Box::new(TestMessage::new(1, i)));
                }
            })
        };

        let mut seen = HashSet::new();
        while seen.len() < 1000 {
            if let Some(msg) = q.wait_pop(Duration::from_millis(200)) {
                assert!(seen.insert(value_of(&*msg)), "duplicate delivery");
            }
        }
        producer.join().expect("producer join");
        assert_eq!(seen.len(), 1000);
        assert!(q.is_empty());
    }

    #[test]
    fn test_bounded_push_blocks_until_space() {
        let q = Arc::new(DefaultMessageQueue::new(2));
        q.push(Box::new(TestMessage::new(1, 0)));
        q.push(Box::new(TestMessage::new(1, 1)));
        assert_eq!(q.len(), 2);

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                // Blocks until the consumer pops
                q.push(Box::new(TestMessage::new(1, 2)));
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 2, "producer should still be blocked");

        let msg = q.try_pop().expect("first message");
        assert_eq!(value_of(&*msg), 0);
        producer.join().expect("producer join");
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_shutdown_unblocks_and_drops() {
        let q = Arc::new(DefaultMessageQueue::new(1));
        q.push(Box::new(TestMessage::new(1, 0)));

        let blocked = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                // Blocked on not_full, released by shutdown without enqueueing
                q.push(Box::new(TestMessage::new(1, 1)));
            })
        };
        thread::sleep(Duration::from_millis(50));
        q.shutdown();
        blocked.join().expect("blocked producer released");

        // Drain the message pushed before shutdown, then empty
        assert!(q.pop().is_some());
        assert!(q.pop().is_none());

        // Post-shutdown push is a silent drop
        q.push(Box::new(TestMessage::new(1, 2)));
        assert!(q.is_empty());
        assert!(q.is_shutdown());
    }

    #[test]
    fn test_wait_pop_times_out() {
        let q = DefaultMessageQueue::unbounded();
        let start = std::time::Instant::now();
        assert!(q.wait_pop(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_clear_discards() {
        let q = DefaultMessageQueue::unbounded();
        for i in 0..4u64 {
            q.push(Box::new(TestMessage::new(1, i)));
        }
        q.clear();
        assert!(q.is_empty());
        assert!(q.try_pop().is_none());
    }
}
