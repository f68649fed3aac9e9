// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free single-producer single-consumer ring queue.
//!
//! Ring of `capacity + 1` slots with atomic head/tail indices:
//!
//! - producer: writes the slot, then publishes with a release store on
//!   `tail`;
//! - consumer: acquires `tail`, takes the slot, then frees it with a
//!   release store on `head`;
//! - full: `(tail + 1) % (capacity + 1) == head`;
//! - empty: `head == tail`.
//!
//! The SPSC constraint is a contract, not a checked property: with more
//! than one producer or consumer the behavior is unspecified; use
//! [`MpmcMessageQueue`](super::MpmcMessageQueue) instead.

use super::MessageQueue;
use crate::message::Message;
use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Bounded SPSC ring of boxed messages.
pub struct SpscMessageQueue {
    slots: Box<[UnsafeCell<Option<Box<dyn Message>>>]>,

    /// Consumer index, advanced by pop
    head: CachePadded<AtomicUsize>,

    /// Producer index, advanced by push
    tail: CachePadded<AtomicUsize>,

    shutdown: AtomicBool,
    drop_logged: AtomicBool,
}

// SAFETY: the SPSC protocol guarantees a slot is accessed by exactly one
// side at a time: the producer only writes slots in [tail, head) modulo
// the ring (unpublished), the consumer only reads slots in [head, tail)
// (published via the release store on tail). Box<dyn Message> is Send.
unsafe impl Send for SpscMessageQueue {}
unsafe impl Sync for SpscMessageQueue {}

impl SpscMessageQueue {
    /// Create a ring holding up to `capacity` messages.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SPSC queue capacity must be > 0");
        let slots: Vec<UnsafeCell<Option<Box<dyn Message>>>> =
            (0..capacity + 1).map(|_| UnsafeCell::new(None)).collect();
        Self {
            slots: slots.into_boxed_slice(),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            shutdown: AtomicBool::new(false),
            drop_logged: AtomicBool::new(false),
        }
    }

    #[inline]
    fn wrap(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }

    fn log_dropped(&self) {
        if !self.drop_logged.swap(true, Ordering::Relaxed) {
            log::warn!("[QUEUE] push to shutdown SPSC queue, message dropped");
        }
    }
}

impl MessageQueue for SpscMessageQueue {
    fn push(&self, msg: Box<dyn Message>) {
        if self.is_shutdown() {
            self.log_dropped();
            return;
        }

        let tail = self.tail.load(Ordering::Relaxed);
        let next = self.wrap(tail);

        // Full: spin until the consumer frees a slot or the queue shuts
        // down (the message is dropped in that case).
        while next == self.head.load(Ordering::Acquire) {
            if self.is_shutdown() {
                self.log_dropped();
                return;
            }
            thread::yield_now();
        }

        // SAFETY: `tail` is unpublished, only this producer touches it.
        unsafe {
            *self.slots[tail].get() = Some(msg);
        }
        self.tail.store(next, Ordering::Release);
    }

    fn pop(&self) -> Option<Box<dyn Message>> {
        loop {
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            if self.is_shutdown() {
                // Final drain: a push released tail before shutdown
                // became visible
                return self.try_pop();
            }
            thread::yield_now();
        }
    }

    fn try_pop(&self) -> Option<Box<dyn Message>> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `head` was published by the producer's release store on
        // tail, and only this consumer advances head.
        let msg = unsafe { (*self.slots[head].get()).take() };
        self.head.store(self.wrap(head), Ordering::Release);
        msg
    }

    fn wait_pop(&self, timeout: Duration) -> Option<Box<dyn Message>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            if self.is_shutdown() {
                return self.try_pop();
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::yield_now();
        }
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if tail >= head {
            tail - head
        } else {
            self.slots.len() - (head - tail)
        }
    }

    fn clear(&self) {
        // Consumer-side drain; concurrent pushes may land afterwards
        while self.try_pop().is_some() {}
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

// ============================================================================
// Tests
// ============================================================================
