use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// Keyed single-flight locks, one per destination or per file object.
///
/// Each engine owns its own registry, so two engines in one process never
/// contend on each other's keys.
#[derive(Clone, Default)]
pub struct LockRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key` without waiting. `None` means another task
    /// currently holds it.
    pub fn try_acquire(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok()
    }

    /// Drop entries nobody holds. Returns how many were removed.
    pub fn purge_idle(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        let before = locks.len();
        // A held lock is also referenced by its guard.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tasks started by one engine pass.
///
/// Dropping it detaches the tasks; `settle` waits for all of them.
pub struct Spawned<T> {
    handles: Vec<JoinHandle<T>>,
}

impl<T: Send + 'static> Spawned<T> {
    pub(crate) fn new(handles: Vec<JoinHandle<T>>) -> Self {
        Self { handles }
    }

    /// Number of tasks started.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task. Panicked tasks are logged and left out.
    pub async fn settle(self) -> Vec<T> {
        let mut results = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "Engine task failed"),
            }
        }
        results
    }
}
