use jsonwebtoken::{decode, DecodingKey, Validation, Algorithm};
use thiserror::Error;

use crate::models::claims::TokenClaims;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Token invalid or expired")]
    InvalidToken,

    #[error("JWT secret is empty")]
    MissingSecret,

    #[error("Token type not accepted for this endpoint")]
    InvalidTokenType,
}

/// Validate an HS256 access token and return its claims
pub fn validate_token(token: &str, secret: &str) -> Result<TokenClaims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::MissingSecret);
    }

    let validation = Validation::new(Algorithm::HS256);

    let token_data = decode::<TokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| JwtError::InvalidToken)?;

    if !token_data.claims.is_access_token() {
        tracing::warn!("Rejected non-access token: {}", token_data.claims.token_type);
        return Err(JwtError::InvalidTokenType);
    }

    Ok(token_data.claims)
}

/// Extract bearer token from the Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-key-for-testing-only";

    fn create_test_token(token_type: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = TokenClaims {
            sub: 42,
            email: "seller@example.com".to_string(),
            role: "admin".to_string(),
            exp: now + 900,
            iat: now,
            token_type: token_type.to_string(),
            jti: "test-jti".to_string(),
        };

        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn test_validate_access_token() {
        let claims = validate_token(&create_test_token("access"), SECRET).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_refresh_token_rejected() {
        let result = validate_token(&create_test_token("refresh"), SECRET);
        assert!(matches!(result, Err(JwtError::InvalidTokenType)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let result = validate_token(&create_test_token("access"), "another-secret");
        assert!(matches!(result, Err(JwtError::InvalidToken)));
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(
            extract_bearer_token("Bearer abc123token"),
            Some("abc123token".to_string())
        );
        assert_eq!(extract_bearer_token("Token abc123"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
    }
}
