// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timer scheduler worker and state.
//!
//! One mutex guards the whole state (heap + task map + group maps); the
//! worker always drops it before invoking callbacks, so a callback may
//! freely create, modify or cancel timers. Cancellation is lazy: heap
//! entries are validated against the task map when they surface, which
//! keeps `cancel` O(1) on the heap (amortised O(log n) overall).

use super::{TimerGroupId, TimerId, INVALID_TIMER_ID};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Callback = Arc<dyn Fn() + Send + Sync>;

struct TimerTask {
    next_run_ms: u64,
    interval_ms: u64,
    repeat: bool,
    callback: Callback,
}

/// Heap entry; stale entries (cancelled or rescheduled tasks) are
/// skipped when they surface.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    next_run_ms: u64,
    id: TimerId,
}

struct State {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    tasks: HashMap<TimerId, TimerTask>,
    groups: HashMap<TimerGroupId, HashSet<TimerId>>,
    group_of: HashMap<TimerId, TimerGroupId>,
    next_id: TimerId,
    next_group_id: TimerGroupId,
    stopping: bool,
}

impl State {
    fn detach_from_group(&mut self, id: TimerId) {
        if let Some(group_id) = self.group_of.remove(&id) {
            if let Some(members) = self.groups.get_mut(&group_id) {
                members.remove(&id);
                if members.is_empty() {
                    self.groups.remove(&group_id);
                }
            }
        }
    }
}

struct Shared {
    state: Mutex<State>,
    cv: Condvar,
    epoch: Instant,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// One-shot/repeating timer scheduler with bulk-cancellable groups.
pub struct TimerScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerScheduler {
    /// Create the scheduler and spawn its worker thread.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                tasks: HashMap::new(),
                groups: HashMap::new(),
                group_of: HashMap::new(),
                next_id: 1,
                next_group_id: 1,
                stopping: false,
            }),
            cv: Condvar::new(),
            epoch: Instant::now(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("netsvc-timer".to_string())
                .spawn(move || run_worker(&shared))
                .ok()
        };
        if worker.is_none() {
            log::error!("[TIMER] failed to spawn scheduler worker");
        }

        Self {
            shared,
            worker: Mutex::new(worker),
        }
    }

    /// Schedule a one-shot timer.
    pub fn once<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule(delay, Duration::ZERO, false, Arc::new(callback))
    }

    /// Schedule a repeating timer: first fire after `delay`, then every
    /// `interval`.
    pub fn repeat<F>(&self, delay: Duration, interval: Duration, callback: F) -> TimerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule(delay, interval, true, Arc::new(callback))
    }

    fn schedule(
        &self,
        delay: Duration,
        interval: Duration,
        repeat: bool,
        callback: Callback,
    ) -> TimerId {
        let mut state = self.shared.lock();
        if state.stopping {
            log::warn!("[TIMER] timer created after scheduler stop, ignored");
            return INVALID_TIMER_ID;
        }

        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        if state.next_id == INVALID_TIMER_ID {
            state.next_id = 1;
        }

        let next_run_ms = self.shared.now_ms() + delay.as_millis() as u64;
        state.tasks.insert(
            id,
            TimerTask {
                next_run_ms,
                interval_ms: interval.as_millis() as u64,
                repeat,
                callback,
            },
        );
        state.heap.push(Reverse(HeapEntry { next_run_ms, id }));
        drop(state);
        self.shared.cv.notify_all();
        id
    }

    /// Cancel a timer. Returns false if the timer does not exist. A
    /// callback already executing is not aborted; no further firings
    /// happen after cancel returns.
    pub fn cancel(&self, id: TimerId) -> bool {
        if id == INVALID_TIMER_ID {
            return false;
        }
        let mut state = self.shared.lock();
        if state.tasks.remove(&id).is_none() {
            return false;
        }
        state.detach_from_group(id);
        // The heap entry stays; the worker skips it on surfacing
        true
    }

    /// Reschedule a timer: `next_run = now + delay`, with new interval
    /// and repeat flag. Returns false for unknown ids.
    pub fn modify(&self, id: TimerId, delay: Duration, interval: Duration, repeat: bool) -> bool {
        if id == INVALID_TIMER_ID {
            return false;
        }
        let now_ms = self.shared.now_ms();
        let mut state = self.shared.lock();
        let Some(task) = state.tasks.get_mut(&id) else {
            return false;
        };
        let next_run_ms = now_ms + delay.as_millis() as u64;
        task.next_run_ms = next_run_ms;
        task.interval_ms = interval.as_millis() as u64;
        task.repeat = repeat;
        state.heap.push(Reverse(HeapEntry { next_run_ms, id }));
        drop(state);
        self.shared.cv.notify_all();
        true
    }

    pub fn exists(&self, id: TimerId) -> bool {
        id != INVALID_TIMER_ID && self.shared.lock().tasks.contains_key(&id)
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every timer and delete every group.
    pub fn clear(&self) {
        let mut state = self.shared.lock();
        state.tasks.clear();
        state.heap.clear();
        state.groups.clear();
        state.group_of.clear();
        drop(state);
        self.shared.cv.notify_all();
    }

    // ========================================================================
    // Groups
    // ========================================================================

    /// Create an empty timer group.
    pub fn create_group(&self) -> TimerGroupId {
        let mut state = self.shared.lock();
        let id = state.next_group_id;
        state.next_group_id = state.next_group_id.wrapping_add(1);
        if state.next_group_id == 0 {
            state.next_group_id = 1;
        }
        state.groups.insert(id, HashSet::new());
        id
    }

    /// Add a timer to a group. A timer belongs to at most one group:
    /// adding it to a second group moves it. Returns false if either
    /// the timer or the group does not exist.
    pub fn add_to_group(&self, group_id: TimerGroupId, timer_id: TimerId) -> bool {
        if group_id == 0 || timer_id == INVALID_TIMER_ID {
            return false;
        }
        let mut state = self.shared.lock();
        if !state.tasks.contains_key(&timer_id) || !state.groups.contains_key(&group_id) {
            return false;
        }
        if state.group_of.get(&timer_id) == Some(&group_id) {
            return true;
        }
        state.detach_from_group(timer_id);
        // detach may have removed an emptied old group, never this one:
        // membership above guarantees it exists and is non-identical
        state
            .groups
            .entry(group_id)
            .or_default()
            .insert(timer_id);
        state.group_of.insert(timer_id, group_id);
        true
    }

    /// Remove a timer from a group without cancelling it. Deletes the
    /// group when its last member leaves.
    pub fn remove_from_group(&self, group_id: TimerGroupId, timer_id: TimerId) -> bool {
        if group_id == 0 || timer_id == INVALID_TIMER_ID {
            return false;
        }
        let mut state = self.shared.lock();
        if state.group_of.get(&timer_id) != Some(&group_id) {
            return false;
        }
        state.detach_from_group(timer_id);
        true
    }

    /// Cancel every timer in the group and delete the group.
    pub fn cancel_group(&self, group_id: TimerGroupId) -> bool {
        if group_id == 0 {
            return false;
        }
        let mut state = self.shared.lock();
        let Some(members) = state.groups.remove(&group_id) else {
            return false;
        };
        for timer_id in members {
            state.tasks.remove(&timer_id);
            state.group_of.remove(&timer_id);
        }
        true
    }

    /// Timers currently in the group (unspecified order).
    pub fn group_timers(&self, group_id: TimerGroupId) -> Vec<TimerId> {
        let state = self.shared.lock();
        state
            .groups
            .get(&group_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop the worker and drop all timers. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            if state.stopping {
                return;
            }
            state.stopping = true;
            state.tasks.clear();
            state.heap.clear();
            state.groups.clear();
            state.group_of.clear();
        }
        self.shared.cv.notify_all();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("[TIMER] scheduler worker panicked");
            }
        }
        log::debug!("[TIMER] scheduler stopped");
    }
}

impl Default for TimerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker loop: sleep until the earliest live deadline, fire all due
/// callbacks outside the lock, reschedule repeating tasks.
fn run_worker(shared: &Shared) {
    let mut due: Vec<(TimerId, Callback)> = Vec::new();

    loop {
        {
            let mut state = shared.lock();

            // Wait until a live entry is due
            loop {
                if state.stopping {
                    return;
                }

                // Discard stale heap heads (cancelled or rescheduled)
                let head = loop {
                    let entry = match state.heap.peek() {
                        None => break None,
                        Some(Reverse(entry)) => *entry,
                    };
                    let live = state
                        .tasks
                        .get(&entry.id)
                        .is_some_and(|t| t.next_run_ms == entry.next_run_ms);
                    if live {
                        break Some(entry);
                    }
                    state.heap.pop();
                };

                match head {
                    None => {
                        state = shared
                            .cv
                            .wait(state)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    Some(entry) => {
                        let now = shared.now_ms();
                        if entry.next_run_ms <= now {
                            break;
                        }
                        let wait = Duration::from_millis(entry.next_run_ms - now);
                        // Woken early when a sooner deadline is inserted
                        // or the scheduler stops; re-evaluate either way
                        let (guard, _timeout) = shared
                            .cv
                            .wait_timeout(state, wait)
                            .unwrap_or_else(PoisonError::into_inner);
                        state = guard;
                    }
                }
            }

            // Collect every due entry in deadline order
            let now = shared.now_ms();
            while let Some(Reverse(entry)) = state.heap.peek().copied() {
                if entry.next_run_ms > now {
                    break;
                }
                state.heap.pop();
                let Some(task) = state.tasks.get_mut(&entry.id) else {
                    continue;
                };
                if task.next_run_ms != entry.next_run_ms {
                    continue; // rescheduled, a fresher entry exists
                }
                due.push((entry.id, Arc::clone(&task.callback)));
                if task.repeat && task.interval_ms > 0 {
                    // Fire-from-now: no drift compensation
                    task.next_run_ms = now + task.interval_ms;
                    let next_run_ms = task.next_run_ms;
                    state
                        .heap
                        .push(Reverse(HeapEntry { next_run_ms, id: entry.id }));
                } else {
                    state.tasks.remove(&entry.id);
                    state.detach_from_group(entry.id);
                }
            }
        }

        for (id, callback) in due.drain(..) {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                log::error!("[TIMER] panic in timer {} callback", id);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter() -> (Arc<AtomicU32>, impl Fn() + Send + Sync + Clone + 'static) {
        let count = Arc::new(AtomicU32::new(0));
        let cb = {
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        (count, cb)
    }

    #[test]
    fn test_once_fires_once() {
        let scheduler = TimerScheduler::new();
        let (count, cb) = counter();
        let id = scheduler.once(Duration::from_millis(20), cb);
        assert_ne!(id, INVALID_TIMER_ID);
        assert!(scheduler.exists(id));

        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.exists(id), "one-shot removed after firing");
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let scheduler = TimerScheduler::new();
        let (count, cb) = counter();
        let id = scheduler.once(Duration::from_millis(60), cb);
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id), "second cancel reports missing");

        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    // Fire-from-now rescheduling: interval 10 ms over 500 ms yields
    // 45..=55 firings.
    #[test]
    fn test_repeat_firing_count() {
        let scheduler = TimerScheduler::new();
        let (count, cb) = counter();
        let id = scheduler.repeat(Duration::from_millis(10), Duration::from_millis(10), cb);

        thread::sleep(Duration::from_millis(500));
        scheduler.cancel(id);
        let fired = count.load(Ordering::SeqCst);
        assert!(
            (45..=55).contains(&fired),
            "expected 45..=55 firings, got {}",
            fired
        );

        // No further firings after cancel
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn test_modify_reschedules() {
        let scheduler = TimerScheduler::new();
        let (count, cb) = counter();
        let id = scheduler.once(Duration::from_millis(500), cb);

        // Pull the deadline in
        assert!(scheduler.modify(
            id,
            Duration::from_millis(20),
            Duration::ZERO,
            false
        ));
        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.modify(id, Duration::ZERO, Duration::ZERO, false));
    }

    #[test]
    fn test_callbacks_fire_in_deadline_order() {
        let scheduler = TimerScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (delay, tag) in [(60u64, 3u32), (20, 1), (40, 2)] {
            let order = Arc::clone(&order);
            scheduler.once(Duration::from_millis(delay), move || {
                order.lock().expect("order lock").push(tag);
            });
        }
        thread::sleep(Duration::from_millis(160));
        assert_eq!(*order.lock().expect("order lock"), vec![1, 2, 3]);
    }

    // Cancel a group at t=75ms with members at 50, 100 and 150 ms;
    // only the 50 ms timer fires.
    #[test]
    fn test_group_cancel_is_exact() {
        let scheduler = TimerScheduler::new();
        let (count, cb) = counter();
        let group = scheduler.create_group();

        let mut ids = Vec::new();
        for delay in [50u64, 100, 150] {
            let id = scheduler.once(Duration::from_millis(delay), cb.clone());
            assert!(scheduler.add_to_group(group, id));
            ids.push(id);
        }
        // An unrelated timer survives the group cancel
        let (other_count, other_cb) = counter();
        scheduler.once(Duration::from_millis(100), other_cb);

        thread::sleep(Duration::from_millis(75));
        assert!(scheduler.cancel_group(group));
        thread::sleep(Duration::from_millis(150));

        assert_eq!(count.load(Ordering::SeqCst), 1, "only the 50 ms timer fires");
        assert_eq!(other_count.load(Ordering::SeqCst), 1, "other timers unaffected");
        assert!(scheduler.group_timers(group).is_empty());
    }

    #[test]
    fn test_group_membership_moves() {
        let scheduler = TimerScheduler::new();
        let g1 = scheduler.create_group();
        let g2 = scheduler.create_group();
        let id = scheduler.once(Duration::from_secs(5), || {});

        assert!(scheduler.add_to_group(g1, id));
        assert!(scheduler.add_to_group(g2, id));
        // g1 lost its last member and was deleted
        assert!(scheduler.group_timers(g1).is_empty());
        assert_eq!(scheduler.group_timers(g2), vec![id]);

        assert!(scheduler.remove_from_group(g2, id));
        assert!(scheduler.exists(id), "removal does not cancel");
        assert!(!scheduler.cancel_group(g2), "emptied group was deleted");
    }

    #[test]
    fn test_firing_one_shot_leaves_group() {
        let scheduler = TimerScheduler::new();
        let group = scheduler.create_group();
        let id = scheduler.once(Duration::from_millis(20), || {});
        assert!(scheduler.add_to_group(group, id));

        thread::sleep(Duration::from_millis(120));
        assert!(scheduler.group_timers(group).is_empty());
    }

    #[test]
    fn test_panicking_callback_does_not_kill_worker() {
        let scheduler = TimerScheduler::new();
        scheduler.once(Duration::from_millis(10), || panic!("callback panic"));
        let (count, cb) = counter();
        scheduler.once(Duration::from_millis(40), cb);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 1, "worker survived the panic");
    }

    #[test]
    fn test_clear_and_len() {
        let scheduler = TimerScheduler::new();
        for _ in 0..3 {
            scheduler.once(Duration::from_secs(10), || {});
        }
        assert_eq!(scheduler.len(), 3);
        scheduler.clear();
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let scheduler = TimerScheduler::new();
        scheduler.once(Duration::from_secs(10), || {});
        scheduler.stop();
        scheduler.stop();
        assert_eq!(
            scheduler.once(Duration::from_millis(1), || {}),
            INVALID_TIMER_ID
        );
    }
}
