use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(tenant_id: Uuid, user_id: Uuid, email: Option<String>, valid_for: Duration) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            user_id,
            email,
            exp: (now + valid_for).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),
    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),
    #[error("JWT secret not configured")]
    InvalidSecret,
}

fn secret() -> Result<&'static str, JwtError> {
    let secret = config::config().security.jwt_secret.as_str();
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }
    Ok(secret)
}

pub fn generate_jwt(claims: &Claims) -> Result<String, JwtError> {
    let encoding_key = EncodingKey::from_secret(secret()?.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

/// Verify an HS256 token and return its claims; `exp` is enforced
pub fn decode_jwt(token: &str) -> Result<Claims, JwtError> {
    let decoding_key = DecodingKey::from_secret(secret()?.as_bytes());
    decode::<Claims>(token, &decoding_key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip_with_configured_secret() {
        let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), Some("ops@acme.io".to_string()), Duration::hours(1));
        let token = generate_jwt(&claims).unwrap();
        let decoded = decode_jwt(&token).unwrap();
        assert_eq!(decoded.tenant_id, claims.tenant_id);
        assert_eq!(decoded.user_id, claims.user_id);
        assert_eq!(decoded.email.as_deref(), Some("ops@acme.io"));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), None, Duration::hours(-2));
        let token = generate_jwt(&claims).unwrap();
        assert!(matches!(decode_jwt(&token), Err(JwtError::InvalidToken(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_jwt("not.a.token").is_err());
    }
}
