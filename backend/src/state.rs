use std::sync::Arc;

use crate::handlers::auth::JwtVerifier;
use crate::services::DatingService;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DatingService>,
    pub auth: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(service: DatingService, auth: JwtVerifier) -> Self {
        Self {
            service: Arc::new(service),
            auth: Arc::new(auth),
        }
    }
}
