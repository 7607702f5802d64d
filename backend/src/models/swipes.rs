use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Like,
    Superlike,
    Dislike,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Like => "like",
            Decision::Superlike => "superlike",
            Decision::Dislike => "dislike",
        }
    }

    /// Like and superlike both count as interest for matching.
    pub fn is_positive(&self) -> bool {
        matches!(self, Decision::Like | Decision::Superlike)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Decision::Like),
            "superlike" => Ok(Decision::Superlike),
            "dislike" => Ok(Decision::Dislike),
            other => Err(format!("unknown decision '{}'", other)),
        }
    }
}

/// Which side of the ledger a listing reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionFilter {
    Liked,
    Disliked,
}

impl DecisionFilter {
    pub fn accepts(&self, decision: Decision) -> bool {
        match self {
            DecisionFilter::Liked => decision.is_positive(),
            DecisionFilter::Disliked => decision == Decision::Dislike,
        }
    }

    pub fn decisions(&self) -> &'static [Decision] {
        match self {
            DecisionFilter::Liked => &[Decision::Like, Decision::Superlike],
            DecisionFilter::Disliked => &[Decision::Dislike],
        }
    }
}

/// The current decision of one user about another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwipeEdge {
    pub from_user: UserId,
    pub to_user: UserId,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
}

impl SwipeEdge {
    pub fn new(
        from_user: UserId,
        to_user: UserId,
        decision: Decision,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            from_user,
            to_user,
            decision,
            decided_at,
        }
    }
}
