//! JWT Token Handler
//! Mission: Validate service-principal tokens issued by the external auth provider

use crate::auth::models::Claims;
use anyhow::{Context, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use tracing::debug;

/// Validates bearer tokens against a shared secret.
///
/// Token issuance lives outside this service; `JwtHandler` only ever
/// decodes and checks what it is handed.
pub struct JwtHandler {
    secret: String,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Validate a bearer token and extract claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired token")?;

        debug!(sub = %decoded.claims.sub, "validated service token");
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn issue(secret: &str, claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_accepted() {
        let handler = JwtHandler::new("test-secret-key".to_string());
        let claims = Claims {
            sub: "payment-executor".to_string(),
            exp: 9_999_999_999,
            scope: None,
        };
        let token = issue("test-secret-key", &claims);

        let decoded = handler.validate_token(&token).unwrap();
        assert_eq!(decoded.sub, "payment-executor");
    }

    #[test]
    fn test_malformed_token_rejected() {
        let handler = JwtHandler::new("test-secret-key".to_string());
        assert!(handler.validate_token("not.a.token").is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let claims = Claims {
            sub: "svc".to_string(),
            exp: 9_999_999_999,
            scope: None,
        };
        let token = issue("secret-a", &claims);

        let handler = JwtHandler::new("secret-b".to_string());
        assert!(handler.validate_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let claims = Claims {
            sub: "svc".to_string(),
            exp: 1,
            scope: None,
        };
        let token = issue("test-secret-key", &claims);

        let handler = JwtHandler::new("test-secret-key".to_string());
        assert!(handler.validate_token(&token).is_err());
    }
}
