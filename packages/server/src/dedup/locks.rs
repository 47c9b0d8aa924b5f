use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-size mutual exclusion for resolve-then-create.
///
/// Identical content always has identical length, so holding the lock for an
/// upload's size across candidate lookup, hashing and record creation keeps
/// two concurrent copies of the same bytes from both being judged unique.
/// Uploads of different sizes never wait on each other.
#[derive(Default)]
pub struct SizeLocks {
    slots: DashMap<i64, Arc<Mutex<()>>>,
}

impl SizeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `size`.
    pub async fn lock(&self, size: i64) -> SizeGuard<'_> {
        let slot = Arc::clone(
            &self
                .slots
                .entry(size)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        let guard = slot.lock_owned().await;
        SizeGuard {
            locks: self,
            size,
            guard: Some(guard),
        }
    }

    /// Number of sizes currently locked or waited on.
    pub fn active(&self) -> usize {
        self.slots.len()
    }
}

pub struct SizeGuard<'a> {
    locks: &'a SizeLocks,
    size: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SizeGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map itself still holds the slot: nobody is waiting.
        self.locks
            .slots
            .remove_if(&self.size, |_, slot| Arc::strong_count(slot) == 1);
    }
}
