// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process runtime: the shared collaborators a host wires into its
//! services.
//!
//! There are no process-wide singletons: the host builds one [`Runtime`]
//! at startup and threads it through service constructors. Tests build
//! independent runtimes. Cloning a `Runtime` clones handles, not the
//! underlying scheduler or factory.
//!
//! ```
//! use netsvc::runtime::Runtime;
//!
//! let runtime = Runtime::new();
//! runtime.factory().register(1, 1, || {
//!     Box::new(netsvc::message::BaseMessage::new(1, 1))
//! });
//! runtime.shutdown();
//! ```

use crate::message::MessageFactory;
use crate::timer::TimerScheduler;
use std::sync::Arc;

/// Shared collaborators: timer scheduler and message factory.
#[derive(Clone)]
pub struct Runtime {
    timers: Arc<TimerScheduler>,
    factory: Arc<MessageFactory>,
}

impl Runtime {
    /// Build a runtime; spawns the timer scheduler worker.
    pub fn new() -> Self {
        log::debug!("[RT] runtime created");
        Self {
            timers: Arc::new(TimerScheduler::new()),
            factory: Arc::new(MessageFactory::new()),
        }
    }

    /// The timer scheduler.
    pub fn timers(&self) -> &Arc<TimerScheduler> {
        &self.timers
    }

    /// The message factory used by network services to rebuild typed
    /// messages from frames.
    pub fn factory(&self) -> &Arc<MessageFactory> {
        &self.factory
    }

    /// Stop the timer scheduler. Idempotent; also happens when the last
    /// runtime handle drops.
    pub fn shutdown(&self) {
        self.timers.stop();
        log::debug!("[RT] runtime shut down");
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
