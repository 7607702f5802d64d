use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::StoreError;
use crate::handlers::response::error_response;

/// Errors surfaced by the swipe engine and the dialog hubs. None of them is
/// fatal to the process; each is scoped to one request or connection.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("a user cannot swipe on themselves")]
    InvalidTarget,

    #[error("no match exists between these users")]
    NoMatch,

    #[error("user is not a participant of this dialog")]
    NotParticipant,

    #[error("dialog is closed")]
    DialogClosed,

    #[error("profile not found")]
    ProfileNotFound,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidTarget | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NoMatch | ServiceError::NotParticipant => StatusCode::FORBIDDEN,
            ServiceError::DialogClosed => StatusCode::GONE,
            ServiceError::ProfileNotFound => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServiceError::Store(e) => {
                tracing::error!("Request failed on storage: {}", e);
                "service temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };
        error_response(message, status)
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
