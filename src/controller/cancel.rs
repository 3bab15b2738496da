//! Cancellation by work-unit key.
//!
//! A cancelled run stops before its next step; a step already in flight is
//! never interrupted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared flag observed by the pipeline between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Tokens keyed by work-unit key. Cancelling a key that has not started yet
/// cancels it as soon as it does.
#[derive(Debug, Default)]
pub(crate) struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelRegistry {
    pub(crate) fn token(&self, key: &str) -> CancelToken {
        match self.tokens.lock() {
            Ok(mut tokens) => tokens.entry(key.to_string()).or_default().clone(),
            Err(poisoned) => poisoned.into_inner().entry(key.to_string()).or_default().clone(),
        }
    }

    pub(crate) fn cancel(&self, key: &str) {
        self.token(key).cancel();
    }

    pub(crate) fn release(&self, key: &str) {
        match self.tokens.lock() {
            Ok(mut tokens) => tokens.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        };
    }
}

/// Cloneable handle for cancelling work units from outside the controller.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    registry: Arc<CancelRegistry>,
}

impl CancelHandle {
    pub(crate) fn new(registry: Arc<CancelRegistry>) -> Self {
        Self { registry }
    }

    /// Cancel the run for a work unit at its next step boundary.
    pub fn cancel(&self, work_unit_key: &str) {
        log::info!("Cancellation requested for {}", work_unit_key);
        self.registry.cancel(work_unit_key);
    }
}
