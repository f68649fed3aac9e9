// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free bounded multi-producer multi-consumer queue.
//!
//! Vyukov bounded MPMC scheme: every cell carries a sequence number.
//! A producer may claim cell `pos` when `sequence == pos` (CAS on
//! `enqueue_pos`); after writing it publishes with
//! `sequence = pos + 1`. A consumer may claim the cell when
//! `sequence == pos + 1` (CAS on `dequeue_pos`); after taking the value
//! it recycles the cell with `sequence = pos + capacity`.
//!
//! Wait-free under no contention, lock-free under contention: a stalled
//! thread can delay its own cell but never blocks the queue as a whole.

use super::MessageQueue;
use crate::message::Message;
use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

struct Cell {
    sequence: AtomicUsize,
    value: UnsafeCell<Option<Box<dyn Message>>>,
}

/// Bounded MPMC queue of boxed messages.
pub struct MpmcMessageQueue {
    cells: Box<[Cell]>,
    capacity: usize,

    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,

    shutdown: AtomicBool,
    drop_logged: AtomicBool,
}

// SAFETY: a cell's value is only written by the producer that claimed it
// (successful CAS on enqueue_pos while sequence == pos) and only read by
// the consumer that claimed it (CAS on dequeue_pos while
// sequence == pos + 1). The sequence acquire/release pair orders the
// value access on both sides. Box<dyn Message> is Send.
unsafe impl Send for MpmcMessageQueue {}
unsafe impl Sync for MpmcMessageQueue {}

impl MpmcMessageQueue {
    /// Create a queue holding up to `capacity` messages.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "MPMC queue capacity must be > 0");
        let cells: Vec<Cell> = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(None),
            })
            .collect();
        Self {
            cells: cells.into_boxed_slice(),
            capacity,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
            shutdown: AtomicBool::new(false),
            drop_logged: AtomicBool::new(false),
        }
    }

    fn log_dropped(&self) {
        if !self.drop_logged.swap(true, Ordering::Relaxed) {
            log::warn!("[QUEUE] push to shutdown MPMC queue, message dropped");
        }
    }
}

impl MessageQueue for MpmcMessageQueue {
    fn push(&self, msg: Box<dyn Message>) {
        if self.is_shutdown() {
            self.log_dropped();
            return;
        }

        let mut msg = Some(msg);
        loop {
            let pos = self.enqueue_pos.load(Ordering::Relaxed);
            let cell = &self.cells[pos % self.capacity];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                // Cell free for this position; claim it
                if self
                    .enqueue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    // SAFETY: the CAS gave this producer exclusive claim
                    // on the cell until the sequence store below.
                    unsafe {
                        *cell.value.get() = msg.take();
                    }
                    cell.sequence.store(pos + 1, Ordering::Release);
                    return;
                }
            } else if diff < 0 {
                // Queue full
                if self.is_shutdown() {
                    self.log_dropped();
                    return;
                }
                thread::yield_now();
            } else {
                // Another producer claimed this position; retry
                thread::yield_now();
            }
        }
    }

    fn pop(&self) -> Option<Box<dyn Message>> {
        loop {
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            if self.is_shutdown() {
                return self.try_pop();
            }
            thread::yield_now();
        }
    }

    fn try_pop(&self) -> Option<Box<dyn Message>> {
        loop {
            let pos = self.dequeue_pos.load(Ordering::Relaxed);
            let cell = &self.cells[pos % self.capacity];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;

            if diff == 0 {
                // Cell published for this position; claim it
                if self
                    .dequeue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    // SAFETY: the CAS gave this consumer exclusive claim
                    // on the cell until the sequence store below.
                    let msg = unsafe { (*cell.value.get()).take() };
                    cell.sequence
                        .store(pos + self.capacity, Ordering::Release);
                    return msg;
                }
            } else if diff < 0 {
                // Queue empty
                return None;
            } else {
                // Another consumer claimed this position; retry
                thread::yield_now();
            }
        }
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
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        let head = self.dequeue_pos.load(Ordering::Relaxed);
        tail.saturating_sub(head)
    }

    fn clear(&self) {
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

#[cfg(test)]
mod tests {
    use super::super::testing::{value_of, TestMessage};
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_push_pop_roundtrip() {
        let q = MpmcMessageQueue::new(8);
        q.push(Box::new(TestMessage::new(1, 11)));
        q.push(Box::new(TestMessage::new(1, 22)));
        assert_eq!(q.len(), 2);
        assert_eq!(value_of(&*q.try_pop().expect("first")), 11);
        assert_eq!(value_of(&*q.try_pop().expect("second")), 22);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn test_cell_recycling_wraps() {
        let q = MpmcMessageQueue::new(2);
        for round in 0..10u64 {
            q.push(Box::new(TestMessage::new(1, round)));
            assert_eq!(value_of(&*q.try_pop().expect("recycled cell")), round);
        }
        assert!(q.is_empty());
    }

    // 4 producers push 10 000 distinct integers; 4 consumers drain; the
    // union equals the pushed set, no duplicates.
    #[test]
    fn test_mpmc_exactly_once_delivery() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 2500;
        const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

        let q = Arc::new(MpmcMessageQueue::new(256));
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.push(Box::new(TestMessage::new(1, p * PER_PRODUCER + i)));
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    loop {
                        match q.wait_pop(Duration::from_millis(200)) {
                            Some(msg) => {
                                let value = value_of(&*msg);
                                let mut seen = seen.lock().expect("seen lock");
                                assert!(seen.insert(value), "duplicate delivery of {}", value);
                                if seen.len() as u64 == TOTAL {
                                    return;
                                }
                            }
                            None => {
                                if seen.lock().expect("seen lock").len() as u64 == TOTAL {
                                    return;
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().expect("producer join");
        }
        for c in consumers {
            c.join().expect("consumer join");
        }

        let seen = seen.lock().expect("seen lock");
        assert_eq!(seen.len() as u64, TOTAL);
        assert!((0..TOTAL).all(|v| seen.contains(&v)));
    }

    #[test]
    fn test_shutdown_drains_then_empty() {
        let q = MpmcMessageQueue::new(4);
        q.push(Box::new(TestMessage::new(1, 1)));
        q.shutdown();
        q.push(Box::new(TestMessage::new(1, 2)));
        assert!(q.pop().is_some());
        assert!(q.pop().is_none());
        assert!(q.is_shutdown());
    }
}
