pub mod dating;
pub mod ledger;
pub mod matches;

pub use dating::{DatingService, MatchListing};
pub use ledger::{DecisionOutcome, SwipeLedger};
pub use matches::MatchIndex;
