pub mod config;
pub mod locks;
pub mod logging;

pub use config::Config;
pub use locks::{PairGuard, PairLocks};
pub use logging::init_logging;
