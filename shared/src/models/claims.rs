use serde::{Deserialize, Serialize};

/// JWT claims issued by the auth service and trusted by every marketplace service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    pub sub: i32,
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub token_type: String,
    pub jti: String,
}

impl TokenClaims {
    /// Check whether this is an access token
    pub fn is_access_token(&self) -> bool {
        self.token_type == "access"
    }

    /// Check whether this is a refresh token
    pub fn is_refresh_token(&self) -> bool {
        self.token_type == "refresh"
    }

    /// Sellers upload books and judgments under the `admin` role
    pub fn is_seller(&self) -> bool {
        self.role == "admin" || self.role == "superadmin"
    }

    /// The platform owner; receives commission and manages payouts
    pub fn is_superadmin(&self) -> bool {
        self.role == "superadmin"
    }

    /// Plain reader account
    pub fn is_reader(&self) -> bool {
        self.role == "user"
    }

    /// Check whether the token has expired against the current time
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp <= now
    }

    /// Remaining validity in seconds
    pub fn remaining_validity(&self) -> i64 {
        let now = chrono::Utc::now().timestamp();
        (self.exp - now).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_claims() -> TokenClaims {
        let now = chrono::Utc::now().timestamp();
        TokenClaims {
            sub: 123,
            email: "reader@example.com".to_string(),
            role: "user".to_string(),
            exp: now + 900,
            iat: now,
            token_type: "access".to_string(),
            jti: "unique-jti-123".to_string(),
        }
    }

    #[test]
    fn test_is_access_token() {
        let claims = create_test_claims();
        assert!(claims.is_access_token());
        assert!(!claims.is_refresh_token());
    }

    #[test]
    fn test_seller_roles() {
        let mut claims = create_test_claims();
        assert!(!claims.is_seller());

        claims.role = "admin".to_string();
        assert!(claims.is_seller());
        assert!(!claims.is_superadmin());

        claims.role = "superadmin".to_string();
        assert!(claims.is_seller());
        assert!(claims.is_superadmin());
    }

    #[test]
    fn test_is_reader() {
        let claims = create_test_claims();
        assert!(claims.is_reader());
    }

    #[test]
    fn test_is_expired() {
        let mut claims = create_test_claims();
        assert!(!claims.is_expired());
        claims.exp = chrono::Utc::now().timestamp() - 1;
        assert!(claims.is_expired());
    }

    #[test]
    fn test_remaining_validity() {
        let claims = create_test_claims();
        let remaining = claims.remaining_validity();
        assert!(remaining > 0 && remaining <= 900);
    }
}
