use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::store::{MatchStore, MessageStore, ProfileDirectory, SwipeStore};
use crate::models::{
    ChatMessage, Decision, DecisionFilter, DialogKey, Match, MatchCursor, ProfileSummary, SwipeEdge,
    UserId,
};

#[derive(Debug, FromRow)]
struct SwipeRow {
    from_user: Uuid,
    to_user: Uuid,
    decision: String,
    decided_at: DateTime<Utc>,
}

impl TryFrom<SwipeRow> for SwipeEdge {
    type Error = StoreError;

    fn try_from(row: SwipeRow) -> StoreResult<Self> {
        let decision: Decision = row.decision.parse().map_err(StoreError::Corrupt)?;
        Ok(SwipeEdge::new(row.from_user.into(), row.to_user.into(), decision, row.decided_at))
    }
}

#[derive(Debug, FromRow)]
struct MatchRow {
    user_lo: Uuid,
    user_hi: Uuid,
    formed_at: DateTime<Utc>,
}

impl TryFrom<MatchRow> for Match {
    type Error = StoreError;

    fn try_from(row: MatchRow) -> StoreResult<Self> {
        Ok(Match {
            key: dialog_key(row.user_lo, row.user_hi)?,
            formed_at: row.formed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    user_lo: Uuid,
    user_hi: Uuid,
    seq: i64,
    sender: Uuid,
    payload: String,
    sent_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> StoreResult<Self> {
        Ok(ChatMessage {
            dialog: dialog_key(row.user_lo, row.user_hi)?,
            sequence: u64::try_from(row.seq)
                .map_err(|_| StoreError::Corrupt(format!("negative sequence {}", row.seq)))?,
            sender: row.sender.into(),
            payload: row.payload,
            sent_at: row.sent_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: Uuid,
    display_name: String,
    bio: Option<String>,
    avatar_url: Option<String>,
}

fn dialog_key(lo: Uuid, hi: Uuid) -> StoreResult<DialogKey> {
    DialogKey::new(lo.into(), hi.into())
        .ok_or_else(|| StoreError::Corrupt(format!("self-paired row {}", lo)))
}

fn to_db_seq(sequence: u64) -> StoreResult<i64> {
    i64::try_from(sequence)
        .map_err(|_| StoreError::Corrupt(format!("sequence {} overflows", sequence)))
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SwipeStore for PgStore {
    async fn upsert_swipe(&self, edge: &SwipeEdge) -> StoreResult<Option<SwipeEdge>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO swipe_log (from_user, to_user, decision, decided_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(edge.from_user.0)
        .bind(edge.to_user.0)
        .bind(edge.decision.as_str())
        .bind(edge.decided_at)
        .execute(&mut *tx)
        .await?;

        let previous = sqlx::query_as::<_, SwipeRow>(
            r#"
            SELECT from_user, to_user, decision, decided_at
            FROM swipes
            WHERE from_user = $1 AND to_user = $2
            FOR UPDATE
            "#,
        )
        .bind(edge.from_user.0)
        .bind(edge.to_user.0)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO swipes (from_user, to_user, decision, decided_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (from_user, to_user)
            DO UPDATE SET decision = EXCLUDED.decision, decided_at = EXCLUDED.decided_at
            "#,
        )
        .bind(edge.from_user.0)
        .bind(edge.to_user.0)
        .bind(edge.decision.as_str())
        .bind(edge.decided_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        previous.map(SwipeEdge::try_from).transpose()
    }

    async fn get_swipe(
        &self,
        from_user: UserId,
        to_user: UserId,
    ) -> StoreResult<Option<SwipeEdge>> {
        let row = sqlx::query_as::<_, SwipeRow>(
            r#"
            SELECT from_user, to_user, decision, decided_at
            FROM swipes
            WHERE from_user = $1 AND to_user = $2
            "#,
        )
        .bind(from_user.0)
        .bind(to_user.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SwipeEdge::try_from).transpose()
    }

    async fn list_swipes(
        &self,
        user: UserId,
        filter: DecisionFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<SwipeEdge>> {
        let decisions: Vec<String> = filter
            .decisions()
            .iter()
            .map(|d| d.as_str().to_string())
            .collect();

        let rows = sqlx::query_as::<_, SwipeRow>(
            r#"
            SELECT from_user, to_user, decision, decided_at
            FROM swipes
            WHERE from_user = $1 AND decision = ANY($2)
            ORDER BY decided_at DESC, to_user ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user.0)
        .bind(decisions)
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SwipeEdge::try_from).collect()
    }
}

#[async_trait]
impl MatchStore for PgStore {
    async fn get_match(&self, key: DialogKey) -> StoreResult<Option<Match>> {
        let row = sqlx::query_as::<_, MatchRow>(
            r#"
            SELECT user_lo, user_hi, formed_at
            FROM matches
            WHERE user_lo = $1 AND user_hi = $2
            "#,
        )
        .bind(key.lo().0)
        .bind(key.hi().0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Match::try_from).transpose()
    }

    async fn insert_match(&self, m: &Match) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO matches (user_lo, user_hi, formed_at, pair_key)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_lo, user_hi) DO NOTHING
            "#,
        )
        .bind(m.key.lo().0)
        .bind(m.key.hi().0)
        .bind(m.formed_at)
        .bind(m.key.pair_key())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_match(&self, key: DialogKey) -> StoreResult<Option<Match>> {
        let row = sqlx::query_as::<_, MatchRow>(
            r#"
            DELETE FROM matches
            WHERE user_lo = $1 AND user_hi = $2
            RETURNING user_lo, user_hi, formed_at
            "#,
        )
        .bind(key.lo().0)
        .bind(key.hi().0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Match::try_from).transpose()
    }

    async fn list_matches(
        &self,
        user: UserId,
        after: Option<&MatchCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Match>> {
        let rows = sqlx::query_as::<_, MatchRow>(
            r#"
            SELECT user_lo, user_hi, formed_at
            FROM matches
            WHERE (user_lo = $1 OR user_hi = $1)
              AND (
                $2::timestamptz IS NULL
                OR formed_at < $2
                OR (formed_at = $2 AND pair_key > $3)
              )
            ORDER BY formed_at DESC, pair_key ASC
            LIMIT $4
            "#,
        )
        .bind(user.0)
        .bind(after.map(|c| c.formed_at))
        .bind(after.map(|c| c.pair_key.clone()))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Match::try_from).collect()
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn append_message(&self, message: &ChatMessage) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO dialog_messages (user_lo, user_hi, seq, sender, payload, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_lo, user_hi, seq) DO NOTHING
            "#,
        )
        .bind(message.dialog.lo().0)
        .bind(message.dialog.hi().0)
        .bind(to_db_seq(message.sequence)?)
        .bind(message.sender.0)
        .bind(&message.payload)
        .bind(message.sent_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // The slot is taken. Accept it only if it holds this exact row.
        let existing = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT user_lo, user_hi, seq, sender, payload, sent_at
            FROM dialog_messages
            WHERE user_lo = $1 AND user_hi = $2 AND seq = $3
            "#,
        )
        .bind(message.dialog.lo().0)
        .bind(message.dialog.hi().0)
        .bind(to_db_seq(message.sequence)?)
        .fetch_optional(&self.pool)
        .await?
        .map(ChatMessage::try_from)
        .transpose()?;

        match existing {
            Some(row) if &row == message => Ok(()),
            _ => Err(StoreError::Corrupt(format!(
                "duplicate sequence {} in dialog {}",
                message.sequence, message.dialog
            ))),
        }
    }

    async fn last_sequence(&self, dialog: DialogKey) -> StoreResult<u64> {
        let last = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(seq) FROM dialog_messages WHERE user_lo = $1 AND user_hi = $2",
        )
        .bind(dialog.lo().0)
        .bind(dialog.hi().0)
        .fetch_one(&self.pool)
        .await?;

        Ok(last.unwrap_or(0).max(0) as u64)
    }

    async fn messages_after(
        &self,
        dialog: DialogKey,
        after: u64,
        limit: i64,
    ) -> StoreResult<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT user_lo, user_hi, seq, sender, payload, sent_at
            FROM dialog_messages
            WHERE user_lo = $1 AND user_hi = $2 AND seq > $3
            ORDER BY seq ASC
            LIMIT $4
            "#,
        )
        .bind(dialog.lo().0)
        .bind(dialog.hi().0)
        .bind(to_db_seq(after)?)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn dialog_partners(&self, user: UserId) -> StoreResult<Vec<UserId>> {
        let partners = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT CASE WHEN user_lo = $1 THEN user_hi ELSE user_lo END AS partner
            FROM dialog_messages
            WHERE user_lo = $1 OR user_hi = $1
            ORDER BY partner
            "#,
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(partners.into_iter().map(UserId::from).collect())
    }
}

#[async_trait]
impl ProfileDirectory for PgStore {
    async fn lookup(&self, user: UserId) -> StoreResult<Option<ProfileSummary>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT id, display_name, bio, avatar_url
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(user.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ProfileSummary {
            id: row.id.into(),
            display_name: row.display_name,
            bio: row.bio,
            avatar_url: row.avatar_url,
        }))
    }
}
