// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Priority message queue (mutex + max-heap).
//!
//! Higher priority value pops first. The default priority of a message
//! is its category; a custom priority function can be injected at
//! construction. Messages sharing a priority pop in unspecified order;
//! consumers must not rely on ordering within a priority band.

use super::MessageQueue;
use crate::message::Message;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Priority function: larger integer means earlier delivery.
pub type PriorityFn = Box<dyn Fn(&dyn Message) -> i32 + Send + Sync>;

struct Entry {
    priority: i32,
    msg: Box<dyn Message>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so natural order gives
        // highest-priority-first
        self.priority.cmp(&other.priority)
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    shutdown: bool,
    drop_logged: bool,
}

/// Max-heap queue guarded by a single mutex.
pub struct PriorityMessageQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    max_len: usize,
    priority_fn: Option<PriorityFn>,
}

impl PriorityMessageQueue {
    /// Create a queue ordering by message category; `max_len == 0`
    /// means unbounded.
    pub fn new(max_len: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                shutdown: false,
                drop_logged: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            max_len,
            priority_fn: None,
        }
    }

    /// Create a queue with a custom priority function.
    pub fn with_priority_fn(max_len: usize, priority_fn: PriorityFn) -> Self {
        let mut queue = Self::new(max_len);
        queue.priority_fn = Some(priority_fn);
        queue
    }

    fn priority_of(&self, msg: &dyn Message) -> i32 {
        match &self.priority_fn {
            Some(f) => f(msg),
            None => i32::from(msg.category()),
        }
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
            log::warn!("[QUEUE] push to shutdown priority queue, message dropped");
        }
    }

    fn pop_entry(&self, inner: &mut Inner) -> Option<Box<dyn Message>> {
        inner.heap.pop().map(|entry| entry.msg)
    }
}

impl MessageQueue for PriorityMessageQueue {
    fn push(&self, msg: Box<dyn Message>) {
        let priority = self.priority_of(&*msg);
        let mut inner = self.lock();
        if inner.shutdown {
            Self::log_dropped(&mut inner);
            return;
        }

        if self.bounded() && inner.heap.len() >= self.max_len {
            log::warn!(
                "[QUEUE] priority queue full ({}), producer waiting",
                self.max_len
            );
            while inner.heap.len() >= self.max_len && !inner.shutdown {
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

        inner.heap.push(Entry { priority, msg });
        drop(inner);
        self.not_empty.notify_one();
    }

    fn pop(&self) -> Option<Box<dyn Message>> {
        let mut inner = self.lock();
        while inner.heap.is_empty() && !inner.shutdown {
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let msg = self.pop_entry(&mut inner)?;
        drop(inner);
        if self.bounded() {
            self.not_full.notify_one();
        }
        Some(msg)
    }

    fn try_pop(&self) -> Option<Box<dyn Message>> {
        let mut inner = self.lock();
        let msg = self.pop_entry(&mut inner)?;
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
                inner.heap.is_empty() && !inner.shutdown
            })
            .unwrap_or_else(PoisonError::into_inner);
        let msg = self.pop_entry(&mut inner)?;
        drop(inner);
        if self.bounded() {
            self.not_full.notify_one();
        }
        Some(msg)
    }

    fn len(&self) -> usize {
        self.lock().heap.len()
    }

    fn clear(&self) {
        let mut inner = self.lock();
        inner.heap.clear();
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

    // Categories 1, 5, 3 pushed in that order pop as 5, 3, 1.
    #[test]
    fn test_higher_category_pops_first() {
        let q = PriorityMessageQueue::new(0);
        for category in [1u8, 5, 3] {
            q.push(Box::new(TestMessage::new(category, u64::from(category))));
        }
        let order: Vec<u64> = (0..3)
            .map(|_| value_of(&*q.try_pop().expect("queued message")))
            .collect();
        assert_eq!(order, vec![5, 3, 1]);
    }

    // For m1 pushed before m2 with category(m1) < category(m2), m2 is
    // delivered before m1.
    #[test]
    fn test_priority_inversion_never_occurs() {
        let q = PriorityMessageQueue::new(0);
        for i in 0..100u64 {
            let category = (i % 7) as u8;
            q.push(Box::new(TestMessage::new(category, i)));
        }
        let mut last_priority = i32::MAX;
        while let Some(msg) = q.try_pop() {
            let priority = i32::from(msg.category());
            assert!(priority <= last_priority, "priority order violated");
            last_priority = priority;
        }
    }

    #[test]
    fn test_custom_priority_fn() {
        // Invert: lower category first
        let q = PriorityMessageQueue::with_priority_fn(
            0,
            Box::new(|msg| -i32::from(msg.category())),
        );
        for category in [1u8, 5, 3] {
            q.push(Box::new(TestMessage::new(category, u64::from(category))));
        }
        let order: Vec<u64> = (0..3)
            .map(|_| value_of(&*q.try_pop().expect("queued message")))
            .collect();
        assert_eq!(order, vec![1, 3, 5]);
    }

    #[test]
    fn test_shutdown_drops_pushes() {
        let q = PriorityMessageQueue::new(0);
        q.push(Box::new(TestMessage::new(1, 1)));
        q.shutdown();
        q.push(Box::new(TestMessage::new(2, 2)));
        assert_eq!(q.len(), 1);
        assert!(q.pop().is_some());
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_wait_pop_delivers_highest() {
        let q = PriorityMessageQueue::new(0);
        q.push(Box::new(TestMessage::new(2, 2)));
        q.push(Box::new(TestMessage::new(9, 9)));
        let msg = q
            .wait_pop(Duration::from_millis(10))
            .expect("message available");
        assert_eq!(value_of(&*msg), 9);
    }
}
