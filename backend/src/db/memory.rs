use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use super::error::{StoreError, StoreResult};
use super::store::{MatchStore, MessageStore, ProfileDirectory, SwipeStore};
use crate::models::{
    ChatMessage, DecisionFilter, DialogKey, Match, MatchCursor, ProfileSummary, SwipeEdge, UserId,
};

#[derive(Default)]
struct Inner {
    profiles: HashMap<UserId, ProfileSummary>,
    swipe_log: Vec<SwipeEdge>,
    swipes: HashMap<(UserId, UserId), SwipeEdge>,
    matches: HashMap<DialogKey, Match>,
    messages: HashMap<DialogKey, BTreeMap<u64, ChatMessage>>,
}

/// In-process store with the same semantics as the Postgres one. Backs the
/// test suite and local runs without a database.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    append_failures: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_profile(&self, profile: ProfileSummary) {
        self.inner.write().await.profiles.insert(profile.id, profile);
    }

    /// Makes the next `count` message appends fail with a transient error.
    pub fn fail_next_appends(&self, count: u32) {
        self.append_failures.store(count, Ordering::SeqCst);
    }

    /// Every decision ever recorded, oldest first.
    pub async fn swipe_log(&self) -> Vec<SwipeEdge> {
        self.inner.read().await.swipe_log.clone()
    }

    fn take_append_failure(&self) -> bool {
        self.append_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SwipeStore for MemoryStore {
    async fn upsert_swipe(&self, edge: &SwipeEdge) -> StoreResult<Option<SwipeEdge>> {
        let mut inner = self.inner.write().await;
        inner.swipe_log.push(edge.clone());
        Ok(inner.swipes.insert((edge.from_user, edge.to_user), edge.clone()))
    }

    async fn get_swipe(
        &self,
        from_user: UserId,
        to_user: UserId,
    ) -> StoreResult<Option<SwipeEdge>> {
        Ok(self.inner.read().await.swipes.get(&(from_user, to_user)).cloned())
    }

    async fn list_swipes(
        &self,
        user: UserId,
        filter: DecisionFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<SwipeEdge>> {
        let inner = self.inner.read().await;
        let mut edges: Vec<SwipeEdge> = inner
            .swipes
            .values()
            .filter(|edge| edge.from_user == user && filter.accepts(edge.decision))
            .cloned()
            .collect();
        edges.sort_by(|a, b| {
            b.decided_at
                .cmp(&a.decided_at)
                .then_with(|| a.to_user.cmp(&b.to_user))
        });
        Ok(edges
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn get_match(&self, key: DialogKey) -> StoreResult<Option<Match>> {
        Ok(self.inner.read().await.matches.get(&key).cloned())
    }

    async fn insert_match(&self, m: &Match) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.matches.contains_key(&m.key) {
            return Ok(false);
        }
        inner.matches.insert(m.key, m.clone());
        Ok(true)
    }

    async fn delete_match(&self, key: DialogKey) -> StoreResult<Option<Match>> {
        Ok(self.inner.write().await.matches.remove(&key))
    }

    async fn list_matches(
        &self,
        user: UserId,
        after: Option<&MatchCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Match>> {
        let inner = self.inner.read().await;
        let mut matches: Vec<Match> = inner
            .matches
            .values()
            .filter(|m| m.key.contains(user))
            .filter(|m| after.is_none_or(|cursor| cursor.admits(m)))
            .cloned()
            .collect();
        matches.sort_by(Match::listing_order);
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_message(&self, message: &ChatMessage) -> StoreResult<()> {
        if self.take_append_failure() {
            return Err(StoreError::Unavailable("injected append failure".to_string()));
        }
        let mut inner = self.inner.write().await;
        let log = inner.messages.entry(message.dialog).or_default();
        match log.get(&message.sequence) {
            // A retried append of a row that already landed.
            Some(existing) if existing == message => Ok(()),
            Some(_) => Err(StoreError::Corrupt(format!(
                "duplicate sequence {} in dialog {}",
                message.sequence, message.dialog
            ))),
            None => {
                log.insert(message.sequence, message.clone());
                Ok(())
            }
        }
    }

    async fn last_sequence(&self, dialog: DialogKey) -> StoreResult<u64> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .get(&dialog)
            .and_then(|log| log.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn messages_after(
        &self,
        dialog: DialogKey,
        after: u64,
        limit: i64,
    ) -> StoreResult<Vec<ChatMessage>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(&dialog)
            .map(|log| {
                log.range(after.saturating_add(1)..)
                    .take(limit.max(0) as usize)
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn dialog_partners(&self, user: UserId) -> StoreResult<Vec<UserId>> {
        let inner = self.inner.read().await;
        let mut partners: Vec<UserId> = inner
            .messages
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .filter_map(|(key, _)| key.peer_of(user))
            .collect();
        partners.sort();
        Ok(partners)
    }
}

#[async_trait]
impl ProfileDirectory for MemoryStore {
    async fn lookup(&self, user: UserId) -> StoreResult<Option<ProfileSummary>> {
        Ok(self.inner.read().await.profiles.get(&user).cloned())
    }
}
