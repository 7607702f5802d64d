use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::dialogs::DialogKey;
use super::swipes::{SwipeEdge, UserId};

/// A reciprocated like between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub key: DialogKey,
    pub formed_at: DateTime<Utc>,
}

impl Match {
    /// Builds the match implied by two opposite edges. The formation time is the
    /// later of the two decisions.
    pub fn from_edges(forward: &SwipeEdge, backward: &SwipeEdge) -> Option<Self> {
        if forward.from_user != backward.to_user || forward.to_user != backward.from_user {
            return None;
        }
        let key = DialogKey::new(forward.from_user, forward.to_user)?;
        Some(Self {
            key,
            formed_at: forward.decided_at.max(backward.decided_at),
        })
    }

    pub fn partner_of(&self, user: UserId) -> Option<UserId> {
        self.key.peer_of(user)
    }

    pub fn cursor(&self) -> MatchCursor {
        MatchCursor {
            formed_at: self.formed_at,
            pair_key: self.key.pair_key(),
        }
    }

    /// Listing order: newest first, ties broken by the concatenated pair ids.
    pub fn listing_order(a: &Match, b: &Match) -> Ordering {
        b.formed_at
            .cmp(&a.formed_at)
            .then_with(|| a.key.pair_key().cmp(&b.key.pair_key()))
    }
}

/// Position in a newest-first match listing. Pages resume strictly after the
/// cursor, so matches inserted after a page was served never shift it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCursor {
    pub formed_at: DateTime<Utc>,
    pub pair_key: String,
}

impl MatchCursor {
    /// True when `m` sorts strictly after this cursor.
    pub fn admits(&self, m: &Match) -> bool {
        match m.formed_at.cmp(&self.formed_at) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => m.key.pair_key() > self.pair_key,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}_{}", self.formed_at.timestamp_micros(), self.pair_key)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let (micros, pair_key) = raw.split_once('_')?;
        let formed_at = DateTime::<Utc>::from_timestamp_micros(micros.parse().ok()?)?;
        if pair_key.is_empty() {
            return None;
        }
        Some(Self {
            formed_at,
            pair_key: pair_key.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchPage {
    pub matches: Vec<Match>,
    pub next_cursor: Option<MatchCursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MatchEvent {
    Formed(Match),
    Dissolved { key: DialogKey, at: DateTime<Utc> },
}

impl MatchEvent {
    pub fn key(&self) -> DialogKey {
        match self {
            MatchEvent::Formed(m) => m.key,
            MatchEvent::Dissolved { key, .. } => *key,
        }
    }
}
