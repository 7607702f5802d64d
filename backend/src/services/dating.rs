use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::ledger::SwipeLedger;
use super::matches::MatchIndex;
use crate::constants::{clamp_page_limit, is_valid_payload};
use crate::db::{RetryPolicy, Store};
use crate::error::{ServiceError, ServiceResult};
use crate::hub::{Attachment, HubConfig, HubHandle, HubRegistry, HubState};
use crate::models::{
    ChatMessage, Decision, DecisionFilter, DialogKey, MatchCursor, MatchEvent, ProfileSummary,
    UserId,
};
use crate::utils::PairLocks;

/// One page of `get_matches`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchListing {
    pub profiles: Vec<ProfileSummary>,
    pub next_cursor: Option<MatchCursor>,
}

/// Everything the API layer calls: swipes, listings and dialogs.
pub struct DatingService {
    store: Arc<dyn Store>,
    ledger: SwipeLedger,
    index: Arc<MatchIndex>,
    registry: Arc<HubRegistry>,
    retry: RetryPolicy,
}

impl DatingService {
    pub fn new(store: Arc<dyn Store>, hub_config: HubConfig) -> Self {
        let retry = hub_config.retry.clone();
        let index = Arc::new(MatchIndex::new(store.clone(), retry.clone()));
        // Swipes and dialog acquisition share per-pair locks.
        let pair_locks = Arc::new(PairLocks::new());
        let ledger = SwipeLedger::new(
            store.clone(),
            index.clone(),
            retry.clone(),
            pair_locks.clone(),
        );
        let registry = Arc::new(HubRegistry::with_pair_locks(
            store.clone(),
            hub_config,
            pair_locks,
        ));
        Self {
            store,
            ledger,
            index,
            registry,
            retry,
        }
    }

    pub fn registry(&self) -> &Arc<HubRegistry> {
        &self.registry
    }

    pub fn index(&self) -> &Arc<MatchIndex> {
        &self.index
    }

    pub fn ledger(&self) -> &SwipeLedger {
        &self.ledger
    }

    pub async fn like(
        &self,
        user: UserId,
        target: UserId,
        super_like: bool,
    ) -> ServiceResult<bool> {
        let decision = if super_like {
            Decision::Superlike
        } else {
            Decision::Like
        };
        let outcome = self
            .ledger
            .record_decision(user, target, decision, Utc::now())
            .await?;
        Ok(outcome.match_formed)
    }

    /// Records a dislike. If it dissolved a match, the dialog's hub is closed
    /// before this returns, still under the pair's lock.
    pub async fn dislike(&self, user: UserId, target: UserId) -> ServiceResult<()> {
        let key = DialogKey::new(user, target).ok_or(ServiceError::InvalidTarget)?;
        let pair = self.ledger.pair_locks().lock(key).await;
        let outcome = self
            .ledger
            .record_locked(&pair, user, target, Decision::Dislike, Utc::now())
            .await?;
        if let Some(MatchEvent::Dissolved { key, .. }) = outcome.event {
            self.registry.close(key).await;
        }
        Ok(())
    }

    pub async fn list_liked(
        &self,
        user: UserId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ServiceResult<Vec<ProfileSummary>> {
        self.list_decided(user, DecisionFilter::Liked, limit, offset).await
    }

    pub async fn list_disliked(
        &self,
        user: UserId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ServiceResult<Vec<ProfileSummary>> {
        self.list_decided(user, DecisionFilter::Disliked, limit, offset).await
    }

    async fn list_decided(
        &self,
        user: UserId,
        filter: DecisionFilter,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ServiceResult<Vec<ProfileSummary>> {
        let targets = self
            .index
            .list_by_decision(user, filter, clamp_page_limit(limit), offset.unwrap_or(0).max(0))
            .await?;
        self.profiles(targets).await
    }

    /// Newest matches first, resuming after `cursor` when given.
    pub async fn get_matches(
        &self,
        user: UserId,
        count: Option<i64>,
        cursor: Option<&MatchCursor>,
    ) -> ServiceResult<MatchListing> {
        let page = self
            .index
            .list_matches(user, clamp_page_limit(count), cursor)
            .await?;
        let partners = page
            .matches
            .iter()
            .filter_map(|m| m.partner_of(user))
            .collect();
        Ok(MatchListing {
            profiles: self.profiles(partners).await?,
            next_cursor: page.next_cursor,
        })
    }

    /// Hub for the pair; fails with `NoMatch` unless they are matched.
    pub async fn get_dialog(&self, user: UserId, target: UserId) -> ServiceResult<HubHandle> {
        self.registry.acquire(user, target).await
    }

    /// Acquires the pair's hub and attaches `user` to it.
    pub async fn open_dialog(
        &self,
        user: UserId,
        target: UserId,
        last_acked: Option<u64>,
    ) -> ServiceResult<Attachment> {
        let hub = self.get_dialog(user, target).await?;
        match hub.attach(user, last_acked).await {
            // The hub retired between acquire and attach; the next acquire
            // spawns a fresh one.
            Err(ServiceError::DialogClosed) if hub.state() == HubState::Retired => {
                let hub = self.get_dialog(user, target).await?;
                hub.attach(user, last_acked).await
            }
            other => other,
        }
    }

    /// Sends without a live connection, e.g. from a REST client.
    ///
    /// Once the match has dissolved this fails with `DialogClosed` rather
    /// than `NoMatch`, as long as the dialog left a trace behind.
    pub async fn send(
        &self,
        user: UserId,
        target: UserId,
        payload: String,
    ) -> ServiceResult<ChatMessage> {
        if !is_valid_payload(&payload) {
            return Err(ServiceError::BadRequest("message payload is empty or too large".into()));
        }
        match self.get_dialog(user, target).await {
            Ok(hub) => hub.send(user, payload).await,
            Err(ServiceError::NoMatch) => Err(self.unmatched_dialog_error(user, target).await?),
            Err(e) => Err(e),
        }
    }

    /// `DialogClosed` if the pair had a dialog (a finished hub or persisted
    /// messages), `NoMatch` if they never got that far.
    async fn unmatched_dialog_error(
        &self,
        user: UserId,
        target: UserId,
    ) -> ServiceResult<ServiceError> {
        let key = DialogKey::new(user, target).ok_or(ServiceError::InvalidTarget)?;
        if self
            .registry
            .get(key)
            .is_some_and(|hub| hub.state() != HubState::Open)
        {
            return Ok(ServiceError::DialogClosed);
        }
        let last = self
            .retry
            .run("last_sequence", || self.store.last_sequence(key))
            .await?;
        Ok(if last > 0 {
            ServiceError::DialogClosed
        } else {
            ServiceError::NoMatch
        })
    }

    /// Users the caller has a live or persisted dialog with.
    pub async fn get_all_chats(&self, user: UserId) -> ServiceResult<Vec<ProfileSummary>> {
        let mut partners: BTreeSet<UserId> = self.registry.partners_of(user);
        let persisted = self
            .retry
            .run("dialog_partners", || self.store.dialog_partners(user))
            .await?;
        partners.extend(persisted);
        self.profiles(partners.into_iter().collect()).await
    }

    /// Persisted messages of the caller's dialog with `target` after `after`.
    /// Readable after the match dissolved.
    pub async fn history(
        &self,
        user: UserId,
        target: UserId,
        after: Option<u64>,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<ChatMessage>> {
        let key = DialogKey::new(user, target).ok_or(ServiceError::InvalidTarget)?;
        let limit = clamp_page_limit(limit);
        let after = after.unwrap_or(0);
        Ok(self
            .retry
            .run("messages_after", || self.store.messages_after(key, after, limit))
            .await?)
    }

    pub async fn profile(&self, user: UserId) -> ServiceResult<ProfileSummary> {
        self.retry
            .run("lookup_profile", || self.store.lookup(user))
            .await?
            .ok_or(ServiceError::ProfileNotFound)
    }

    /// Resolves ids to profile cards in order. Ids without a profile are left out.
    async fn profiles(&self, ids: Vec<UserId>) -> ServiceResult<Vec<ProfileSummary>> {
        let mut profiles = Vec::with_capacity(ids.len());
        for id in ids {
            match self.profile(id).await {
                Ok(profile) => profiles.push(profile),
                Err(ServiceError::ProfileNotFound) => {
                    tracing::debug!(user = %id, "Skipping user without profile");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(profiles)
    }
}
