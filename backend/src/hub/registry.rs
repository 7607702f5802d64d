use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

use super::actor::HubHandle;
use super::{HubConfig, HubState};
use crate::db::Store;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{DialogKey, UserId};
use crate::utils::PairLocks;

/// Process-wide map from matched pair to its live hub.
///
/// `acquire` is linearizable per pair: concurrent callers for the same pair
/// get handles to the same hub.
pub struct HubRegistry {
    store: Arc<dyn Store>,
    config: HubConfig,
    hubs: DashMap<DialogKey, HubHandle>,
    next_id: AtomicU64,
    pair_locks: Arc<PairLocks>,
}

impl HubRegistry {
    pub fn new(store: Arc<dyn Store>, config: HubConfig) -> Self {
        Self::with_pair_locks(store, config, Arc::new(PairLocks::new()))
    }

    /// Registry whose `acquire` serializes with whatever else holds
    /// `pair_locks`, typically the swipe ledger.
    pub fn with_pair_locks(
        store: Arc<dyn Store>,
        config: HubConfig,
        pair_locks: Arc<PairLocks>,
    ) -> Self {
        Self {
            store,
            config,
            hubs: DashMap::new(),
            next_id: AtomicU64::new(1),
            pair_locks,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Returns the hub for the pair, creating it if needed. Fails with
    /// `NoMatch` unless the pair is currently matched.
    ///
    /// The match check and the get-or-spawn run under the pair's lock, so a
    /// dissolution cannot slip in between and have its closed hub replaced.
    pub async fn acquire(&self, a: UserId, b: UserId) -> ServiceResult<HubHandle> {
        let key = DialogKey::new(a, b).ok_or(ServiceError::InvalidTarget)?;
        let _pair = self.pair_locks.lock(key).await;
        let matched = self
            .config
            .retry
            .run("get_match", || self.store.get_match(key))
            .await?;
        if matched.is_none() {
            return Err(ServiceError::NoMatch);
        }
        Ok(self.get_or_spawn(key))
    }

    fn get_or_spawn(&self, key: DialogKey) -> HubHandle {
        match self.hubs.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().state() == HubState::Open {
                    return entry.get().clone();
                }
                // A closing or retired hub never reopens; a re-formed match
                // gets a fresh one.
                let fresh = self.spawn(key);
                let old = entry.insert(fresh.clone());
                old.retire();
                tracing::info!(
                    dialog = %key,
                    old = old.id(),
                    new = fresh.id(),
                    "Replaced finished hub"
                );
                fresh
            }
            Entry::Vacant(entry) => entry.insert(self.spawn(key)).clone(),
        }
    }

    fn spawn(&self, key: DialogKey) -> HubHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        HubHandle::spawn(id, key, self.store.clone(), self.config.clone())
    }

    pub fn get(&self, key: DialogKey) -> Option<HubHandle> {
        self.hubs.get(&key).map(|hub| hub.clone())
    }

    /// Retires and removes the pair's hub if it has been idle past the grace
    /// period (or is closing with nobody attached).
    pub async fn release_if_idle(&self, key: DialogKey) -> bool {
        let Some(hub) = self.get(key) else {
            return false;
        };
        if !hub.retire_if_idle(self.config.idle_grace).await {
            return false;
        }
        let removed = self
            .hubs
            .remove_if(&key, |_, current| current.id() == hub.id())
            .is_some();
        if removed {
            tracing::debug!(dialog = %key, hub = hub.id(), "Hub removed from registry");
        }
        removed
    }

    /// Closes the pair's hub after its match dissolved. Callers hold the
    /// pair's lock.
    pub async fn close(&self, key: DialogKey) {
        if let Some(hub) = self.get(key) {
            hub.close().await;
        }
    }

    /// One pass over every hub, removing the ones that are done.
    pub async fn sweep(&self) -> usize {
        let keys: Vec<DialogKey> = self.hubs.iter().map(|entry| *entry.key()).collect();
        let mut removed = 0;
        for key in keys {
            if self.release_if_idle(key).await {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, remaining = self.hubs.len(), "Hub sweep finished");
        }
        removed
    }

    pub fn spawn_janitor(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                registry.sweep().await;
            }
        })
    }

    /// Partners of `user` that currently have a live hub.
    pub fn partners_of(&self, user: UserId) -> BTreeSet<UserId> {
        self.hubs
            .iter()
            .filter(|entry| entry.value().state() != HubState::Retired)
            .filter_map(|entry| entry.key().peer_of(user))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }
}
