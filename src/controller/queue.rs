//! FIFO of pending work units shared by every worker.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::domain::WorkUnit;

#[derive(Debug, Default)]
pub struct WorkQueue {
    pending: Mutex<VecDeque<WorkUnit>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, unit: WorkUnit) {
        self.lock().push_back(unit);
    }

    /// Take the next unit; each unit is handed to exactly one caller.
    pub fn pop(&self) -> Option<WorkUnit> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<WorkUnit>> {
        // Queue operations cannot leave the deque half-updated
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
