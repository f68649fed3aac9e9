// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Modules: plug-in components attached to a service.
//!
//! A module shares its service's worker thread: `on_update` runs from
//! the service loop, never concurrently with itself. Modules hold a
//! non-owning [`ServiceHandle`](super::ServiceHandle) handed to
//! `on_init`; the service exclusively owns the module, so there are no
//! ownership cycles.
//!
//! Dependency edges between modules form a DAG maintained in a side
//! table; an edge that would close a cycle is rejected with
//! `CircularDependency`.

use super::ServiceHandle;
use crate::error::{Error, ErrorKind, Result};
use std::collections::{HashMap, HashSet};

/// Plug-in component attached to a service.
///
/// All lifecycle hooks default to no-ops; only `name` is mandatory.
pub trait Module: Send {
    /// Unique name within the owning service.
    fn name(&self) -> &str;

    /// Called once when the module is registered. The handle stays
    /// valid for the service's lifetime and can be stored.
    fn on_init(&mut self, _service: &ServiceHandle) -> Result<()> {
        Ok(())
    }

    /// Called when the owning service starts (or at registration if it
    /// is already running).
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when the module is removed or the service stops.
    fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called from the service tick while the module is running.
    fn on_update(&mut self, _elapsed_ms: u64) -> Result<()> {
        Ok(())
    }
}

struct ModuleSlot {
    module: Box<dyn Module>,
    running: bool,
}

/// Name-keyed module table plus the dependency DAG.
#[derive(Default)]
pub(crate) struct ModuleRegistry {
    modules: HashMap<String, ModuleSlot>,
    deps: HashMap<String, Vec<String>>,
}

impl ModuleRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register and initialize a module; starts it if the service is
    /// already running.
    pub(crate) fn register(
        &mut self,
        module: Box<dyn Module>,
        handle: &ServiceHandle,
        service_running: bool,
    ) -> Result<()> {
        let name = module.name().to_string();
        if name.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "module name is empty",
            ));
        }
        if self.modules.contains_key(&name) {
            return Err(Error::new(ErrorKind::ModuleAlreadyExists, name));
        }

        let mut slot = ModuleSlot {
            module,
            running: false,
        };
        if let Err(err) = slot.module.on_init(handle) {
            return Err(Error::new(
                ErrorKind::ModuleInitFailed,
                format!("{}: {}", name, err),
            ));
        }

        if service_running {
            if let Err(err) = slot.module.on_start() {
                if let Err(stop_err) = slot.module.on_stop() {
                    log::warn!(
                        "[SVC] module {} stop after failed start: {}",
                        name,
                        stop_err
                    );
                }
                return Err(Error::new(
                    ErrorKind::Module,
                    format!("failed to start module {}: {}", name, err),
                ));
            }
            slot.running = true;
        }

        self.modules.insert(name.clone(), slot);
        log::info!("[SVC] module {} registered", name);
        Ok(())
    }

    /// Stop (if running) and delete a module.
    pub(crate) fn remove(&mut self, name: &str) -> Result<()> {
        let mut slot = self
            .modules
            .remove(name)
            .ok_or_else(|| Error::new(ErrorKind::ModuleNotFound, name))?;
        if slot.running {
            if let Err(err) = slot.module.on_stop() {
                log::warn!("[SVC] module {} stop: {}", name, err);
            }
        }
        self.deps.remove(name);
        log::info!("[SVC] module {} removed", name);
        Ok(())
    }

    /// Start every stopped module; failures are logged and skipped.
    pub(crate) fn start_all(&mut self) {
        for (name, slot) in &mut self.modules {
            if slot.running {
                continue;
            }
            match slot.module.on_start() {
                Ok(()) => slot.running = true,
                Err(err) => log::error!("[SVC] failed to start module {}: {}", name, err),
            }
        }
    }

    /// Stop every running module; failures are logged and skipped.
    pub(crate) fn stop_all(&mut self) {
        for (name, slot) in &mut self.modules {
            if !slot.running {
                continue;
            }
            slot.running = false;
            if let Err(err) = slot.module.on_stop() {
                log::error!("[SVC] failed to stop module {}: {}", name, err);
            }
        }
    }

    /// Tick every running module; failures are logged, the pass
    /// continues.
    pub(crate) fn update_all(&mut self, elapsed_ms: u64) {
        for (name, slot) in &mut self.modules {
            if !slot.running {
                continue;
            }
            if let Err(err) = slot.module.on_update(elapsed_ms) {
                log::warn!("[SVC] module {} update: {}", name, err);
            }
        }
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.modules.len()
    }

    // ========================================================================
    // Dependency DAG
    // ========================================================================

    /// Add the edge `name -> depends_on`. Both modules must exist; an
    /// edge closing a cycle is rejected.
    pub(crate) fn add_dependency(&mut self, name: &str, depends_on: &str) -> Result<()> {
        if !self.modules.contains_key(name) {
            return Err(Error::new(ErrorKind::ModuleNotFound, name));
        }
        if !self.modules.contains_key(depends_on) {
            return Err(Error::new(ErrorKind::ModuleNotFound, depends_on));
        }
        if name == depends_on || self.reaches(depends_on, name) {
            return Err(Error::new(
                ErrorKind::CircularDependency,
                format!("{} -> {}", name, depends_on),
            ));
        }

        let edges = self.deps.entry(name.to_string()).or_default();
        if !edges.iter().any(|d| d == depends_on) {
            edges.push(depends_on.to_string());
            log::debug!("[SVC] module dependency added: {} -> {}", name, depends_on);
        }
        Ok(())
    }

    /// Direct dependencies of a module.
    pub(crate) fn dependencies(&self, name: &str) -> Vec<String> {
        self.deps.get(name).cloned().unwrap_or_default()
    }

    /// Whether `target` is reachable from `from` over dependency edges.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![from];
        while let Some(node) = stack.pop() {
            if node == target {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(edges) = self.deps.get(node) {
                stack.extend(edges.iter().map(String::as_str));
            }
        }
        false
    }
}

// ============================================================================
// Tests
// ============================================================================
