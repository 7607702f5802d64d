use async_trait::async_trait;

use super::error::StoreResult;
use crate::models::{
    ChatMessage, DecisionFilter, DialogKey, Match, MatchCursor, ProfileSummary, SwipeEdge, UserId,
};

/// Swipe ledger persistence: an append-only log plus the latest edge per
/// ordered pair.
#[async_trait]
pub trait SwipeStore: Send + Sync {
    /// Appends `edge` to the log and makes it the current edge for its ordered
    /// pair. Returns the edge it replaced, if any.
    async fn upsert_swipe(&self, edge: &SwipeEdge) -> StoreResult<Option<SwipeEdge>>;

    async fn get_swipe(&self, from_user: UserId, to_user: UserId) -> StoreResult<Option<SwipeEdge>>;

    /// Current edges from `user` matching `filter`, newest decision first.
    async fn list_swipes(
        &self,
        user: UserId,
        filter: DecisionFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<SwipeEdge>>;
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn get_match(&self, key: DialogKey) -> StoreResult<Option<Match>>;

    /// Inserts the match. Returns false if one already existed for the pair.
    async fn insert_match(&self, m: &Match) -> StoreResult<bool>;

    /// Returns the removed match, if one existed.
    async fn delete_match(&self, key: DialogKey) -> StoreResult<Option<Match>>;

    /// Matches involving `user` in listing order, strictly after `after`.
    async fn list_matches(
        &self,
        user: UserId,
        after: Option<&MatchCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Match>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message. `(dialog, sequence)` is unique: re-appending an
    /// identical row succeeds, a different row in a taken slot is `Corrupt`.
    async fn append_message(&self, message: &ChatMessage) -> StoreResult<()>;

    /// Highest persisted sequence number for the dialog, 0 if none.
    async fn last_sequence(&self, dialog: DialogKey) -> StoreResult<u64>;

    /// Messages with `sequence > after`, ascending, at most `limit`.
    async fn messages_after(
        &self,
        dialog: DialogKey,
        after: u64,
        limit: i64,
    ) -> StoreResult<Vec<ChatMessage>>;

    /// Users `user` has persisted dialog history with.
    async fn dialog_partners(&self, user: UserId) -> StoreResult<Vec<UserId>>;
}

/// Read-only profile lookup.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn lookup(&self, user: UserId) -> StoreResult<Option<ProfileSummary>>;
}

/// Everything the core needs from durable storage.
pub trait Store: SwipeStore + MatchStore + MessageStore + ProfileDirectory {}

impl<T> Store for T where T: SwipeStore + MatchStore + MessageStore + ProfileDirectory {}
