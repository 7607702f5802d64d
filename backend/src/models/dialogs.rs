use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::swipes::UserId;

/// Unordered pair of users. The smaller id is always stored first so that
/// `{a, b}` and `{b, a}` produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DialogKey {
    lo: UserId,
    hi: UserId,
}

impl DialogKey {
    /// Returns `None` for a self-pair.
    pub fn new(a: UserId, b: UserId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { lo: a, hi: b }),
            std::cmp::Ordering::Greater => Some(Self { lo: b, hi: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn lo(&self) -> UserId {
        self.lo
    }

    pub fn hi(&self) -> UserId {
        self.hi
    }

    pub fn participants(&self) -> [UserId; 2] {
        [self.lo, self.hi]
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.lo == user || self.hi == user
    }

    /// Slot index of `user` inside this dialog (0 for the smaller id).
    pub fn side_of(&self, user: UserId) -> Option<usize> {
        if user == self.lo {
            Some(0)
        } else if user == self.hi {
            Some(1)
        } else {
            None
        }
    }

    pub fn peer_of(&self, user: UserId) -> Option<UserId> {
        match self.side_of(user)? {
            0 => Some(self.hi),
            _ => Some(self.lo),
        }
    }

    /// Both ids concatenated in order; the deterministic tie-break between
    /// matches formed at the same instant.
    pub fn pair_key(&self) -> String {
        format!("{}{}", self.lo, self.hi)
    }
}

impl fmt::Display for DialogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.lo, self.hi)
    }
}

/// A chat message as persisted and relayed by a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub dialog: DialogKey,
    pub sequence: u64,
    pub sender: UserId,
    pub payload: String,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialog_key_is_unordered() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(DialogKey::new(a, b), DialogKey::new(b, a));
        assert!(DialogKey::new(a, a).is_none());
    }

    #[test]
    fn test_peer_and_side() {
        let a = UserId::new();
        let b = UserId::new();
        let outsider = UserId::new();
        let key = DialogKey::new(a, b).unwrap();

        assert_eq!(key.peer_of(a), Some(b));
        assert_eq!(key.peer_of(b), Some(a));
        assert_eq!(key.peer_of(outsider), None);
        assert_ne!(key.side_of(a), key.side_of(b));
        assert!(key.pair_key().starts_with(&key.lo().to_string()));
    }
}
