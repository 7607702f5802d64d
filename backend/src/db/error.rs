use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => match err {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db_err) => matches!(
                    db_err.code().as_deref(),
                    // serialization_failure, deadlock_detected
                    Some("40001") | Some("40P01")
                ),
                _ => false,
            },
            StoreError::Unavailable(_) => true,
            StoreError::Corrupt(_) => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
