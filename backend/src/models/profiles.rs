use serde::{Deserialize, Serialize};

use super::swipes::UserId;

/// Public profile card returned by listings. Owned by the profile directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: UserId,
    pub display_name: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}
