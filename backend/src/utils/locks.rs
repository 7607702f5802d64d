use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::DialogKey;

/// Per unordered pair async locks. Entries are dropped once nobody holds or
/// waits on them.
///
/// Swipe decisions and dialog acquisition for a pair go through the same
/// lock, so a match read under it stays valid until the guard drops.
#[derive(Default)]
pub struct PairLocks {
    locks: DashMap<DialogKey, Arc<Mutex<()>>>,
}

/// Held lock for one pair. Releases (and prunes the entry) on drop.
pub struct PairGuard<'a> {
    owner: &'a PairLocks,
    key: DialogKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: DialogKey) -> PairGuard<'_> {
        let lock = self.locks.entry(key).or_default().clone();
        let guard = lock.lock_owned().await;
        PairGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl PairGuard<'_> {
    pub fn key(&self) -> DialogKey {
        self.key
    }
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.owner
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
