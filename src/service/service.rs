// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service core: lifecycle, worker loop and handler table.
//!
//! A service owns exactly one worker thread pinned to its queue:
//!
//! ```text
//! loop while running:
//!   msg = queue.wait_pop(100 ms)
//!   if msg: dispatch(msg)            # panic-protected
//!   elapsed = ms since last tick
//!   if elapsed > 0:
//!      driver.on_update(elapsed)     # panic-protected
//!      modules.update_all(elapsed)
//!      last_tick = now
//! ```
//!
//! The handler table is populated before `start()` and frozen into an
//! `Arc` when the worker spawns; the dispatch hot path takes no lock.

use super::module::{Module, ModuleRegistry};
use super::{ServiceDriver, ServiceState};
use crate::error::{Error, ErrorKind, Result};
use crate::message::queue::{DefaultMessageQueue, MessageQueue};
use crate::message::{dispatch_key, unix_time_ms, Message};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Handler invoked with a received message by reference; the loop
/// releases the message afterwards.
pub type MessageHandler = Box<dyn Fn(&dyn Message) + Send + Sync>;

/// Tick interval for the worker loop's `wait_pop`.
const LOOP_WAIT: Duration = Duration::from_millis(100);

pub(crate) struct ServiceInner {
    name: String,
    queue: Arc<dyn MessageQueue>,
    state: Mutex<ServiceState>,
    running: Arc<AtomicBool>,
    /// Registration-time handler table; taken at `start()`
    building_handlers: Mutex<Option<HashMap<u32, MessageHandler>>>,
    /// Read-only table the worker dispatches from
    frozen_handlers: Mutex<Option<Arc<HashMap<u32, MessageHandler>>>>,
    modules: Mutex<ModuleRegistry>,
    driver: Mutex<Box<dyn ServiceDriver>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServiceInner {
    /// Dispatch against an explicit table; the worker resolves the
    /// frozen table once and stays lock-free per message.
    fn dispatch_in(
        &self,
        table: Option<&HashMap<u32, MessageHandler>>,
        msg: &dyn Message,
    ) -> Result<()> {
        let key = dispatch_key(msg.category(), msg.id());
        if let Some(handler) = table.and_then(|table| table.get(&key)) {
            handler(msg);
            return Ok(());
        }
        log::warn!(
            "[SVC] {} no handler for category={} id={}",
            self.name,
            msg.category(),
            msg.id()
        );
        Err(Error::new(
            ErrorKind::Message,
            format!("no handler for category={} id={}", msg.category(), msg.id()),
        ))
    }

    /// Dispatch a message to its `(category, id)` handler.
    pub(crate) fn dispatch(&self, msg: &dyn Message) -> Result<()> {
        let frozen = lock(&self.frozen_handlers).clone();
        match frozen {
            Some(table) => self.dispatch_in(Some(&table), msg),
            None => {
                // Not started yet: dispatch from the building table
                let building = lock(&self.building_handlers);
                self.dispatch_in(building.as_ref(), msg)
            }
        }
    }

    /// Stamp and enqueue a message.
    pub(crate) fn post(&self, mut msg: Box<dyn Message>) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::ServiceNotStarted, self.name.clone()));
        }
        msg.set_timestamp_ms(unix_time_ms());
        self.queue.push(msg);
        Ok(())
    }
}

/// Non-owning handle to a service, resolved at call time.
///
/// Held by modules and network sessions; posting through a handle whose
/// service is gone yields a `Service` error.
#[derive(Clone)]
pub struct ServiceHandle {
    name: String,
    inner: Weak<ServiceInner>,
}

impl ServiceHandle {
    /// Name of the service this handle points at.
    pub fn service_name(&self) -> &str {
        &self.name
    }

    /// Post a message to the service queue.
    pub fn post(&self, msg: Box<dyn Message>) -> Result<()> {
        let inner = self.inner.upgrade().ok_or_else(|| {
            Error::new(
                ErrorKind::Service,
                format!("service {} no longer exists", self.name),
            )
        })?;
        inner.post(msg)
    }
}

/// Long-lived component owning a worker thread, a message queue, a
/// handler table and a set of modules.
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    /// Create a service with an unbounded default queue and no driver.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_queue(name, Arc::new(DefaultMessageQueue::unbounded()))
    }

    /// Create a service draining the given queue.
    pub fn with_queue(name: impl Into<String>, queue: Arc<dyn MessageQueue>) -> Self {
        Self::with_driver(name, queue, Box::new(super::NoopDriver))
    }

    /// Create a service with lifecycle extension points.
    pub fn with_driver(
        name: impl Into<String>,
        queue: Arc<dyn MessageQueue>,
        driver: Box<dyn ServiceDriver>,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                name: name.into(),
                queue,
                state: Mutex::new(ServiceState::New),
                running: Arc::new(AtomicBool::new(false)),
                building_handlers: Mutex::new(Some(HashMap::new())),
                frozen_handlers: Mutex::new(None),
                modules: Mutex::new(ModuleRegistry::new()),
                driver: Mutex::new(driver),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ServiceState {
        *lock(&self.inner.state)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The queue this service drains.
    pub fn queue(&self) -> &Arc<dyn MessageQueue> {
        &self.inner.queue
    }

    /// Non-owning handle for modules and sessions.
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            name: self.inner.name.clone(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialize: `New -> Initialized`.
    pub fn init(&self) -> Result<()> {
        {
            let state = lock(&self.inner.state);
            if *state != ServiceState::New {
                return Err(Error::new(
                    ErrorKind::Service,
                    format!("{} already initialized ({:?})", self.inner.name, *state),
                ));
            }
        }
        log::info!("[SVC] {} initializing", self.inner.name);
        lock(&self.inner.driver).on_init()?;
        *lock(&self.inner.state) = ServiceState::Initialized;
        Ok(())
    }

    /// Start: `Initialized -> Running`. Freezes the handler table,
    /// spawns the worker, runs the driver's `on_start` and starts
    /// registered modules.
    pub fn start(&self) -> Result<()> {
        {
            let state = lock(&self.inner.state);
            match *state {
                ServiceState::Running => {
                    return Err(Error::new(
                        ErrorKind::ServiceAlreadyStarted,
                        self.inner.name.clone(),
                    ))
                }
                ServiceState::New => {
                    return Err(Error::new(
                        ErrorKind::Service,
                        format!("{} not initialized", self.inner.name),
                    ))
                }
                ServiceState::Stopped => {
                    return Err(Error::new(
                        ErrorKind::Service,
                        format!("{} already stopped", self.inner.name),
                    ))
                }
                ServiceState::Initialized => {}
            }
        }

        log::info!("[SVC] {} starting", self.inner.name);

        // Freeze the handler table; the hot path takes no lock from here
        {
            let table = lock(&self.inner.building_handlers)
                .take()
                .unwrap_or_default();
            *lock(&self.inner.frozen_handlers) = Some(Arc::new(table));
        }

        self.inner.running.store(true, Ordering::Release);

        let worker = {
            let inner = Arc::clone(&self.inner);
            thread::Builder::new()
                .name(format!("netsvc-svc-{}", self.inner.name))
                .spawn(move || run_worker(&inner))
        };
        match worker {
            Ok(handle) => *lock(&self.inner.worker) = Some(handle),
            Err(err) => {
                self.inner.running.store(false, Ordering::Release);
                return Err(Error::new(
                    ErrorKind::System,
                    format!("failed to spawn worker: {}", err),
                ));
            }
        }

        if let Err(err) = lock(&self.inner.driver).on_start() {
            log::error!("[SVC] {} failed to start: {}", self.inner.name, err);
            self.inner.running.store(false, Ordering::Release);
            self.inner.queue.shutdown();
            if let Some(handle) = lock(&self.inner.worker).take() {
                let _ = handle.join();
            }
            *lock(&self.inner.state) = ServiceState::Stopped;
            return Err(err);
        }

        lock(&self.inner.modules).start_all();
        *lock(&self.inner.state) = ServiceState::Running;
        log::info!("[SVC] {} started", self.inner.name);
        Ok(())
    }

    /// Stop: `Running -> Stopped`. Shuts the queue down (pending
    /// messages are discarded), stops modules and joins the worker.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            if *state != ServiceState::Running {
                return Err(Error::new(
                    ErrorKind::ServiceNotStarted,
                    self.inner.name.clone(),
                ));
            }
            *state = ServiceState::Stopped;
        }

        log::info!("[SVC] {} stopping", self.inner.name);
        self.inner.running.store(false, Ordering::Release);
        self.inner.queue.shutdown();

        let stop_result = lock(&self.inner.driver).on_stop();
        if let Err(ref err) = stop_result {
            log::error!("[SVC] {} driver stop: {}", self.inner.name, err);
        }

        lock(&self.inner.modules).stop_all();

        if let Some(handle) = lock(&self.inner.worker).take() {
            if handle.join().is_err() {
                log::error!("[SVC] {} worker panicked", self.inner.name);
            }
        }

        self.inner.queue.clear();
        log::info!("[SVC] {} stopped", self.inner.name);
        stop_result
    }

    /// Block until the worker thread exits (i.e. until `stop()`).
    pub fn wait(&self) -> Result<()> {
        let handle = lock(&self.inner.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                return Err(Error::new(
                    ErrorKind::Service,
                    format!("{} worker panicked", self.inner.name),
                ));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Stamp `timestamp_ms` and push into the queue. Fails with
    /// `ServiceNotStarted` unless the service is running.
    pub fn post(&self, msg: Box<dyn Message>) -> Result<()> {
        self.inner.post(msg)
    }

    /// Synchronously dispatch a message to its handler.
    pub fn dispatch(&self, msg: &dyn Message) -> Result<()> {
        self.inner.dispatch(msg)
    }

    /// Register a handler for `(category, id)`.
    ///
    /// The table is immutable once the service starts; duplicate keys
    /// are rejected.
    pub fn register_handler<F>(&self, category: u8, id: u16, handler: F) -> Result<()>
    where
        F: Fn(&dyn Message) + Send + Sync + 'static,
    {
        let mut building = lock(&self.inner.building_handlers);
        let Some(table) = building.as_mut() else {
            return Err(Error::new(
                ErrorKind::ServiceAlreadyStarted,
                format!("{} handler table is frozen", self.inner.name),
            ));
        };
        let key = dispatch_key(category, id);
        if table.contains_key(&key) {
            return Err(Error::new(
                ErrorKind::HandlerAlreadyRegistered,
                format!("category={} id={}", category, id),
            ));
        }
        table.insert(key, Box::new(handler));
        log::debug!(
            "[SVC] {} handler registered for category={} id={}",
            self.inner.name,
            category,
            id
        );
        Ok(())
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Register a module: initialize it, and start it if the service is
    /// already running.
    pub fn register_module(&self, module: Box<dyn Module>) -> Result<()> {
        let handle = self.handle();
        lock(&self.inner.modules).register(module, &handle, self.is_running())
    }

    /// Stop (if running) and remove a module.
    pub fn remove_module(&self, name: &str) -> Result<()> {
        lock(&self.inner.modules).remove(name)
    }

    pub fn has_module(&self, name: &str) -> bool {
        lock(&self.inner.modules).has(name)
    }

    pub fn module_names(&self) -> Vec<String> {
        lock(&self.inner.modules).names()
    }

    pub fn module_count(&self) -> usize {
        lock(&self.inner.modules).len()
    }

    /// Declare that `name` depends on `depends_on`. Rejects edges that
    /// would close a cycle.
    pub fn add_module_dependency(&self, name: &str, depends_on: &str) -> Result<()> {
        lock(&self.inner.modules).add_dependency(name, depends_on)
    }

    pub fn module_dependencies(&self, name: &str) -> Vec<String> {
        lock(&self.inner.modules).dependencies(name)
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

/// Worker loop. Panics from handlers, the driver tick or module ticks
/// stop at this boundary.
fn run_worker(inner: &Arc<ServiceInner>) {
    log::info!("[SVC] {} worker started", inner.name);
    let mut last_tick = Instant::now();

    // Resolve the frozen table once; dispatch takes no lock per message
    let table = lock(&inner.frozen_handlers).clone();

    while inner.running.load(Ordering::Acquire) {
        if let Some(msg) = inner.queue.wait_pop(LOOP_WAIT) {
            let protected = catch_unwind(AssertUnwindSafe(|| {
                // Dispatch errors (no handler) are already logged
                let _ = inner.dispatch_in(table.as_deref(), &*msg);
            }));
            if protected.is_err() {
                log::error!("[SVC] {} panic in message handler", inner.name);
            }
        }

        let elapsed = last_tick.elapsed().as_millis() as u64;
        if elapsed > 0 {
            let protected = catch_unwind(AssertUnwindSafe(|| {
                if let Err(err) = lock(&inner.driver).on_update(elapsed) {
                    log::warn!("[SVC] {} update: {}", inner.name, err);
                }
                lock(&inner.modules).update_all(elapsed);
            }));
            if protected.is_err() {
                log::error!("[SVC] {} panic in update tick", inner.name);
            }
            last_tick = Instant::now();
        }
    }

    log::info!("[SVC] {} worker stopped", inner.name);
}

// ============================================================================
// Tests
// ============================================================================
