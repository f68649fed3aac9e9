// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message factory: `(category, id)` to constructor registry.
//!
//! The host registers one constructor per message type at startup; the
//! network layer uses the factory to turn decoded frames back into
//! typed messages. Unregistered pairs yield a [`BaseMessage`] carrying
//! the same identity, whose `deserialize` reports `NotImplemented`, so
//! the framer logs the frame as invalid and keeps the session alive.

use super::{dispatch_key, BaseMessage, Message, MessageCategory, MessageId};
use std::collections::HashMap;
use std::sync::RwLock;

type Constructor = Box<dyn Fn() -> Box<dyn Message> + Send + Sync>;

/// Thread-safe constructor registry.
#[derive(Default)]
pub struct MessageFactory {
    creators: RwLock<HashMap<u32, Constructor>>,
}

impl MessageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `(category, id)`.
    ///
    /// Re-registering a pair replaces the previous constructor (last
    /// wins) and is logged at debug level.
    pub fn register<F>(&self, category: MessageCategory, id: MessageId, ctor: F)
    where
        F: Fn() -> Box<dyn Message> + Send + Sync + 'static,
    {
        let key = dispatch_key(category, id);
        let mut creators = self
            .creators
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if creators.insert(key, Box::new(ctor)).is_some() {
            log::debug!(
                "[MSG] constructor replaced for category={} id={}",
                category,
                id
            );
        } else {
            log::debug!(
                "[MSG] constructor registered for category={} id={}",
                category,
                id
            );
        }
    }

    /// Check whether `(category, id)` has a registered constructor.
    pub fn is_registered(&self, category: MessageCategory, id: MessageId) -> bool {
        let creators = self
            .creators
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        creators.contains_key(&dispatch_key(category, id))
    }

    /// Build a message for `(category, id)`.
    ///
    /// Falls back to an identity-only [`BaseMessage`] when no
    /// constructor is registered.
    pub fn create(&self, category: MessageCategory, id: MessageId) -> Box<dyn Message> {
        let creators = self
            .creators
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match creators.get(&dispatch_key(category, id)) {
            Some(ctor) => ctor(),
            None => Box::new(BaseMessage::new(category, id)),
        }
    }

    /// Number of registered constructors.
    pub fn len(&self) -> usize {
        self.creators
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
