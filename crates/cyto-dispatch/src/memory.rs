//! Memory-pressure broker seam.
//!
//! The broker itself is an external collaborator (the embedding shell);
//! the core only defines the registration interface and the cleanup
//! reasons it reacts to. A simple in-process broker is provided for
//! embedders and tests that have no platform signal to wire up.

use std::collections::HashMap;
use std::sync::Mutex;

/// Why cleanup is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    /// Routine housekeeping; keep warm capacity.
    Periodic,
    /// The host is under memory pressure; shed everything idle.
    Pressure,
}

pub type CleanupHandler = Box<dyn Fn(CleanupReason) + Send + Sync>;

pub trait MemoryPressureBroker: Send + Sync {
    fn register(&self, id: &str, handler: CleanupHandler);
    fn unregister(&self, id: &str);
}

/// Minimal broker: stores handlers and lets the owner fire them.
#[derive(Default)]
pub struct LocalMemoryBroker {
    handlers: Mutex<HashMap<String, CleanupHandler>>,
}

impl LocalMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every registered handler with `reason`; returns how many
    /// handlers ran.
    pub fn trigger(&self, reason: CleanupReason) -> usize {
        let handlers = match self.handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handler in handlers.values() {
            handler(reason);
        }
        handlers.len()
    }

    pub fn registered(&self) -> usize {
        match self.handlers.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl MemoryPressureBroker for LocalMemoryBroker {
    fn register(&self, id: &str, handler: CleanupHandler) {
        let mut handlers = match self.handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.insert(id.to_string(), handler);
    }

    fn unregister(&self, id: &str) {
        let mut handlers = match self.handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.remove(id);
    }
}
