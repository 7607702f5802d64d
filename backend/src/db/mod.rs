pub mod connection;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod store;

pub use connection::{DatabaseConfig, connect_store, get_db_pool, run_migrations};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use retry::RetryPolicy;
pub use store::{MatchStore, MessageStore, ProfileDirectory, Store, SwipeStore};
