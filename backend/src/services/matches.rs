use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::constants::MATCH_EVENT_CHANNEL_CAPACITY;
use crate::db::{RetryPolicy, Store};
use crate::error::ServiceResult;
use crate::models::{
    DecisionFilter, DialogKey, Match, MatchCursor, MatchEvent, MatchPage, SwipeEdge, UserId,
};

/// Derives matches from the current swipe edges and keeps them materialized.
pub struct MatchIndex {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    events: broadcast::Sender<MatchEvent>,
}

impl MatchIndex {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(MATCH_EVENT_CHANNEL_CAPACITY);
        Self { store, retry, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    /// Re-evaluates the pair after one of its edges changed.
    ///
    /// Must be called after the edge is durably stored, and with the pair
    /// serialized by the caller.
    pub async fn on_edge_change(
        &self,
        key: DialogKey,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<MatchEvent>> {
        let (lo, hi) = (key.lo(), key.hi());
        let forward = self.edge(lo, hi).await?;
        let backward = self.edge(hi, lo).await?;
        let existing = self
            .retry
            .run("get_match", || self.store.get_match(key))
            .await?;

        let mutual = match (&forward, &backward) {
            (Some(f), Some(b)) if f.decision.is_positive() && b.decision.is_positive() => {
                Match::from_edges(f, b)
            }
            _ => None,
        };

        let event = match (mutual, existing) {
            (Some(m), None) => {
                let inserted = self
                    .retry
                    .run("insert_match", || self.store.insert_match(&m))
                    .await?;
                inserted.then_some(MatchEvent::Formed(m))
            }
            (None, Some(_)) => {
                let removed = self
                    .retry
                    .run("delete_match", || self.store.delete_match(key))
                    .await?;
                removed.map(|_| MatchEvent::Dissolved { key, at: now })
            }
            _ => None,
        };

        if let Some(event) = &event {
            match event {
                MatchEvent::Formed(m) => {
                    tracing::info!(dialog = %key, formed_at = %m.formed_at, "Match formed")
                }
                MatchEvent::Dissolved { .. } => tracing::info!(dialog = %key, "Match dissolved"),
            }
            // No subscribers is fine.
            let _ = self.events.send(event.clone());
        }

        Ok(event)
    }

    pub async fn get_match(&self, key: DialogKey) -> ServiceResult<Option<Match>> {
        Ok(self
            .retry
            .run("get_match", || self.store.get_match(key))
            .await?)
    }

    /// Newest-first page of `user`'s matches, resuming strictly after `after`.
    pub async fn list_matches(
        &self,
        user: UserId,
        limit: i64,
        after: Option<&MatchCursor>,
    ) -> ServiceResult<MatchPage> {
        let limit = limit.max(1);
        let mut matches = self
            .retry
            .run("list_matches", || self.store.list_matches(user, after, limit + 1))
            .await?;

        let next_cursor = if matches.len() as i64 > limit {
            matches.truncate(limit as usize);
            matches.last().map(Match::cursor)
        } else {
            None
        };

        Ok(MatchPage { matches, next_cursor })
    }

    /// Targets of `user`'s current decisions of one kind, newest first.
    pub async fn list_by_decision(
        &self,
        user: UserId,
        filter: DecisionFilter,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<Vec<UserId>> {
        let edges = self
            .retry
            .run("list_swipes", || self.store.list_swipes(user, filter, limit, offset))
            .await?;
        Ok(edges.into_iter().map(|edge| edge.to_user).collect())
    }

    async fn edge(&self, from_user: UserId, to_user: UserId) -> ServiceResult<Option<SwipeEdge>> {
        Ok(self
            .retry
            .run("get_swipe", || self.store.get_swipe(from_user, to_user))
            .await?)
    }
}
