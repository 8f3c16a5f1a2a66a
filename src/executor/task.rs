//! Units of work run by compute pool threads.

use std::time::{Duration, Instant};

/// A boxed job for a compute unit, stamped with when it was queued.
pub(crate) struct Task {
    func: Box<dyn FnOnce() + Send + 'static>,
    queued_at: Instant,
}

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            func: Box::new(f),
            queued_at: Instant::now(),
        }
    }

    /// Time spent in a queue before a compute unit picked it up.
    pub fn queue_wait(&self) -> Duration {
        self.queued_at.elapsed()
    }

    pub fn execute(self) {
        (self.func)();
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("queued_at", &self.queued_at).finish()
    }
}
