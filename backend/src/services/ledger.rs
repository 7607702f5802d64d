use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;

use super::matches::MatchIndex;
use crate::db::{RetryPolicy, Store};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Decision, DialogKey, MatchEvent, SwipeEdge, UserId};
use crate::utils::{PairGuard, PairLocks};

/// Outcome of recording one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub edge: SwipeEdge,
    pub match_formed: bool,
    pub event: Option<MatchEvent>,
}

/// Records like/dislike decisions and keeps the match index in step.
pub struct SwipeLedger {
    store: Arc<dyn Store>,
    index: Arc<MatchIndex>,
    retry: RetryPolicy,
    pair_locks: Arc<PairLocks>,
}

impl SwipeLedger {
    pub fn new(
        store: Arc<dyn Store>,
        index: Arc<MatchIndex>,
        retry: RetryPolicy,
        pair_locks: Arc<PairLocks>,
    ) -> Self {
        Self {
            store,
            index,
            retry,
            pair_locks,
        }
    }

    pub fn pair_locks(&self) -> &Arc<PairLocks> {
        &self.pair_locks
    }

    pub fn index(&self) -> &Arc<MatchIndex> {
        &self.index
    }

    /// Upserts the current edge `from_user -> to_user` and re-evaluates the pair.
    ///
    /// Decisions touching the same unordered pair are serialized, so two
    /// reciprocal likes arriving together form exactly one match. Repeating the
    /// current decision only refreshes its timestamp.
    pub async fn record_decision(
        &self,
        from_user: UserId,
        to_user: UserId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> ServiceResult<DecisionOutcome> {
        let key = DialogKey::new(from_user, to_user).ok_or(ServiceError::InvalidTarget)?;
        let pair = self.pair_locks.lock(key).await;
        self.record_locked(&pair, from_user, to_user, decision, now).await
    }

    /// `record_decision` for a caller already holding the pair's lock, so it
    /// can act on the outcome before anyone else touches the pair.
    pub async fn record_locked(
        &self,
        pair: &PairGuard<'_>,
        from_user: UserId,
        to_user: UserId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> ServiceResult<DecisionOutcome> {
        let key = DialogKey::new(from_user, to_user).ok_or(ServiceError::InvalidTarget)?;
        if key != pair.key() {
            return Err(ServiceError::InvalidTarget);
        }
        let edge = SwipeEdge::new(from_user, to_user, decision, now.trunc_subsecs(6));
        self.apply_locked(key, edge).await
    }

    async fn apply_locked(
        &self,
        key: DialogKey,
        edge: SwipeEdge,
    ) -> ServiceResult<DecisionOutcome> {
        let previous = self
            .retry
            .run("upsert_swipe", || self.store.upsert_swipe(&edge))
            .await?;
        if previous.as_ref().map(|p| p.decision) == Some(edge.decision) {
            tracing::debug!(
                from = %edge.from_user,
                to = %edge.to_user,
                decision = %edge.decision,
                "Repeated decision, timestamp refreshed"
            );
        } else {
            tracing::info!(
                from = %edge.from_user,
                to = %edge.to_user,
                decision = %edge.decision,
                "Decision recorded"
            );
        }

        let event = self.index.on_edge_change(key, edge.decided_at).await?;
        Ok(DecisionOutcome {
            match_formed: matches!(event, Some(MatchEvent::Formed(_))),
            edge,
            event,
        })
    }

    pub async fn current_decision(
        &self,
        from_user: UserId,
        to_user: UserId,
    ) -> ServiceResult<Option<Decision>> {
        let edge = self
            .retry
            .run("get_swipe", || self.store.get_swipe(from_user, to_user))
            .await?;
        Ok(edge.map(|e| e.decision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn ledger() -> SwipeLedger {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let index = Arc::new(MatchIndex::new(store.clone(), RetryPolicy::none()));
        SwipeLedger::new(
            store,
            index,
            RetryPolicy::none(),
            Arc::new(PairLocks::new()),
        )
    }

    #[tokio::test]
    async fn test_self_swipe_is_rejected() {
        let ledger = ledger();
        let me = UserId::new();
        let err = ledger
            .record_decision(me, me, Decision::Like, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTarget));
        assert_eq!(ledger.current_decision(me, me).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_later_decision_overwrites() {
        let ledger = ledger();
        let a = UserId::new();
        let b = UserId::new();

        ledger.record_decision(a, b, Decision::Like, Utc::now()).await.unwrap();
        ledger.record_decision(a, b, Decision::Dislike, Utc::now()).await.unwrap();

        assert_eq!(ledger.current_decision(a, b).await.unwrap(), Some(Decision::Dislike));
        assert_eq!(ledger.current_decision(b, a).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pair_locks_are_cleaned_up() {
        let ledger = ledger();
        let a = UserId::new();
        let b = UserId::new();
        ledger.record_decision(a, b, Decision::Like, Utc::now()).await.unwrap();
        assert!(ledger.pair_locks().is_empty());
    }

    #[tokio::test]
    async fn test_locked_record_must_match_the_held_pair() {
        let ledger = ledger();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let pair = ledger.pair_locks().lock(DialogKey::new(a, b).unwrap()).await;

        let err = ledger
            .record_locked(&pair, a, c, Decision::Like, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTarget));

        let outcome = ledger
            .record_locked(&pair, b, a, Decision::Like, Utc::now())
            .await
            .unwrap();
        assert!(!outcome.match_formed);
        assert_eq!(ledger.current_decision(b, a).await.unwrap(), Some(Decision::Like));
    }
}
