use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::error::ServiceError;
use crate::models::UserId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Verifies bearer tokens and maps their subject to a user id.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(key: DecodingKey, algorithm: Algorithm) -> Self {
        Self {
            key,
            validation: Validation::new(algorithm),
        }
    }

    pub fn from_rsa_pem(pem: &[u8]) -> anyhow::Result<Self> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| anyhow::anyhow!("Invalid JWT public key: {}", e))?;
        Ok(Self::new(key, Algorithm::RS256))
    }

    pub fn verify(&self, token: &str) -> Result<UserId, ServiceError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))?;
        data.claims
            .sub
            .parse()
            .map_err(|_| ServiceError::Unauthorized("token subject is not a user id".into()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer header first, then `?token=` (browsers cannot set headers on a
/// WebSocket handshake).
fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(AUTHORIZATION) {
        let value = value.to_str().ok()?;
        return value.strip_prefix("Bearer ").map(|t| t.trim().to_string());
    }
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
}

/// The caller, as proven by a valid token.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub id: UserId,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts)
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".into()))?;
        let id = state.auth.verify(&token)?;
        Ok(AuthenticatedUser { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: usize,
    }

    fn token(secret: &[u8], sub: &str) -> String {
        let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
        encode(
            &Header::default(),
            &TestClaims { sub: sub.into(), exp },
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_verify_maps_subject() {
        let verifier = JwtVerifier::new(DecodingKey::from_secret(b"secret"), Algorithm::HS256);
        let user = UserId::new();
        assert_eq!(verifier.verify(&token(b"secret", &user.to_string())).unwrap(), user);

        assert!(matches!(
            verifier.verify(&token(b"other", &user.to_string())),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            verifier.verify(&token(b"secret", "not-a-uuid")),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_token_from_header_or_query() {
        let from_header = parts(
            Request::builder()
                .uri("/public/v1/chats")
                .header(AUTHORIZATION, "Bearer abc")
                .body(())
                .unwrap(),
        );
        assert_eq!(extract_token(&from_header).as_deref(), Some("abc"));

        let from_query = parts(
            Request::builder()
                .uri("/public/v1/chat/x?last_seq=3&token=xyz")
                .body(())
                .unwrap(),
        );
        assert_eq!(extract_token(&from_query).as_deref(), Some("xyz"));

        let missing = parts(Request::builder().uri("/public/v1/chats").body(()).unwrap());
        assert_eq!(extract_token(&missing), None);
    }
}
