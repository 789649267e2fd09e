//! Per-job overlap prevention.
//!
//! The only shared mutable discipline in the daemon: "is job X currently
//! running?". Jobs with different names always run in parallel; a second
//! acquisition for the same name is refused until the first permit drops.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct RunGuard {
    running: Mutex<HashSet<String>>,
}

/// Held for the duration of one execution episode; releases on drop.
#[derive(Debug)]
pub struct JobPermit {
    guard: Arc<RunGuard>,
    name: String,
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.guard.lock().remove(&self.name);
    }
}

impl RunGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim the right to run `name`. Returns `None` if a permit for that
    /// name is already outstanding.
    #[must_use]
    pub fn acquire(self: &Arc<Self>, name: &str) -> Option<JobPermit> {
        let mut running = self.lock();
        if running.insert(name.to_string()) {
            Some(JobPermit {
                guard: Arc::clone(self),
                name: name.to_string(),
            })
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.lock().contains(name)
    }
}
