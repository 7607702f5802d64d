pub mod constants;
pub mod db;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod router;
pub mod services;
pub mod state;
pub mod utils;

pub use db::connection::get_db_pool;
pub use error::{ServiceError, ServiceResult};
pub use router::create_router;
pub use state::AppState;
pub use utils::config::Config;

// Re-export common types
pub use anyhow::Result;
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
