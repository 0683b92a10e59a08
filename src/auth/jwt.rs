//! JWT Token Handler
//! Mission: Issue and validate signed access tokens securely

use crate::auth::models::{Claims, User};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

/// Default access-token lifetime. Access tokens are deliberately short-lived:
/// validation is stateless, so the compromise window is bounded by the TTL,
/// not by revocation infrastructure.
pub const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;

/// JWT handler for access-token operations
pub struct JwtHandler {
    secret: String,
    ttl_minutes: i64,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            ttl_minutes: DEFAULT_ACCESS_TTL_MINUTES,
        }
    }

    pub fn with_ttl_minutes(secret: String, ttl_minutes: i64) -> Self {
        Self {
            secret,
            ttl_minutes,
        }
    }

    /// Issue an access token for an authenticated user.
    ///
    /// Claims capture the role set at issuance time; they are never
    /// re-validated against live role state.
    pub fn issue(&self, user: &User) -> Result<(String, usize)> {
        let token = self.issue_from_username(&user.username, &user.role_names())?;
        Ok((token, (self.ttl_minutes * 60) as usize))
    }

    /// Secondary issuance path for the refresh flow: mint a new access token
    /// without re-running credential checks.
    pub fn issue_from_username(&self, username: &str, roles: &[String]) -> Result<String> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::minutes(self.ttl_minutes))
            .context("Invalid timestamp")?
            .timestamp();

        let claims = Claims {
            sub: username.to_string(),
            roles: roles.to_vec(),
            iat: now.timestamp() as usize,
            exp: expiration as usize,
        };

        debug!(
            "Issuing JWT for {}, expires in {}m",
            username, self.ttl_minutes
        );

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to sign JWT")
    }

    /// Validate a token and extract its claims.
    ///
    /// Pure function of the token string, the key, and the clock: rejects on
    /// bad signature, malformed payload, or elapsed expiry. No store lookup.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        // No expiry leeway: a token is invalid the moment its exp passes
        let mut validation = Validation::default();
        validation.leeway = 0;

        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .context("Invalid or expired token")?;

        debug!("Validated JWT for {}", decoded.claims.sub);

        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserRole;
    use uuid::Uuid;

    fn create_test_user() -> User {
        User {
            id: Uuid::new_v4().to_string(),
            username: "testuser".to_string(),
            email: "testuser@example.com".to_string(),
            password_hash: "hash".to_string(),
            roles: vec![UserRole::User],
            enabled: true,
            locked: false,
            account_expired: false,
            credentials_expired: false,
            password_reset_token: None,
            password_reset_expiry: None,
            first_name: None,
            last_name: None,
            phone_number: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_jwt_issue_and_validate() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let user = create_test_user();

        let (token, expires_in) = handler.issue(&user).unwrap();
        assert!(!token.is_empty());
        assert_eq!(expires_in, 15 * 60);

        let claims = handler.validate(&token).unwrap();
        assert_eq!(claims.sub, user.username);
        assert_eq!(claims.roles, vec!["USER".to_string()]);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_invalid_token_rejected() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());

        let result = handler.validate("invalid.token.here");
        assert!(result.is_err());
    }

    #[test]
    fn test_different_secrets_reject() {
        let handler1 = JwtHandler::new("secret1".to_string());
        let handler2 = JwtHandler::new("secret2".to_string());
        let user = create_test_user();

        let (token, _) = handler1.issue(&user).unwrap();
        assert!(handler2.validate(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let handler = JwtHandler::with_ttl_minutes("test-secret-key-12345".to_string(), -5);
        let user = create_test_user();

        let (token, _) = handler.issue(&user).unwrap();
        assert!(handler.validate(&token).is_err());
    }

    #[test]
    fn test_recently_expired_token_rejected_without_leeway() {
        // Expired by one minute: a default 60s leeway would still accept
        // this token, so validation must run with leeway disabled.
        let handler = JwtHandler::with_ttl_minutes("test-secret-key-12345".to_string(), -1);
        let user = create_test_user();

        let (token, _) = handler.issue(&user).unwrap();
        assert!(handler.validate(&token).is_err());
    }

    #[test]
    fn test_issue_from_username_carries_roles() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let roles = vec!["USER".to_string(), "ADMIN".to_string()];

        let token = handler.issue_from_username("admin", &roles).unwrap();
        let claims = handler.validate(&token).unwrap();

        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.roles, roles);
        assert!(claims.has_any_role(&["ADMIN"]));
    }
}
