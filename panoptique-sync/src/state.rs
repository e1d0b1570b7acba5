use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// The single authority on which sources are mid-sync, shared by the direct path and the queue.
#[derive(Clone, Default)]
pub struct SyncLocks {
    inner: Arc<Mutex<HashSet<i64>>>,
}

/// Held while a source syncs; releases the source on drop.
pub struct SyncLockGuard {
    locks: SyncLocks,
    source_id: i64,
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, HashSet<i64>> {
        // The set is always left consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `source_id`, or `None` when another sync already holds it.
    pub fn try_acquire(&self, source_id: i64) -> Option<SyncLockGuard> {
        if self.set().insert(source_id) {
            Some(SyncLockGuard {
                locks: self.clone(),
                source_id,
            })
        } else {
            None
        }
    }

    pub fn is_locked(&self, source_id: i64) -> bool {
        self.set().contains(&source_id)
    }

    pub fn locked_sources(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.set().iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl SyncLockGuard {
    pub fn source_id(&self) -> i64 {
        self.source_id
    }
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.locks.set().remove(&self.source_id);
    }
}
