pub mod dialogs;
pub mod matches;
pub mod profiles;
pub mod swipes;

pub use dialogs::{ChatMessage, DialogKey};
pub use matches::{Match, MatchCursor, MatchEvent, MatchPage};
pub use profiles::ProfileSummary;
pub use swipes::{Decision, DecisionFilter, SwipeEdge, UserId};
