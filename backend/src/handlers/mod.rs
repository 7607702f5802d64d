pub mod auth;
pub mod chat;
pub mod response;
pub mod swipes;
pub mod system;

pub use auth::{AuthenticatedUser, JwtVerifier};
pub use response::{JsonResponse, error_response, write_response};
