//! Credential Verifier
//! Mission: Check presented credentials against stored account state

use crate::auth::models::User;
use crate::auth::user_store::UserStore;
use bcrypt::verify;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Internal failure detail. Every variant except `Store` collapses to the
/// same generic "invalid credentials" signal at the API boundary so that
/// responses never reveal account existence or state; the distinction exists
/// for logging only.
#[derive(Debug)]
pub enum CredentialError {
    UnknownIdentifier,
    BadPassword,
    Disabled,
    Locked,
    AccountExpired,
    CredentialsExpired,
    Store(anyhow::Error),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::UnknownIdentifier => write!(f, "no account for identifier"),
            CredentialError::BadPassword => write!(f, "password mismatch"),
            CredentialError::Disabled => write!(f, "account is disabled"),
            CredentialError::Locked => write!(f, "account is locked"),
            CredentialError::AccountExpired => write!(f, "account has expired"),
            CredentialError::CredentialsExpired => write!(f, "credentials have expired"),
            CredentialError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

/// Checks identifier + password against the user store and account-status
/// flags. Performs no token issuance: that belongs to the callers.
pub struct CredentialVerifier {
    users: Arc<UserStore>,
}

impl CredentialVerifier {
    pub fn new(users: Arc<UserStore>) -> Self {
        Self { users }
    }

    /// Authenticate by username or email.
    ///
    /// Checks run in a fixed order: lookup, password, enabled, locked,
    /// account expiry, credential expiry. The password check runs before any
    /// status check so a locked account behaves exactly like a wrong
    /// password from the outside.
    pub fn authenticate(&self, identifier: &str, password: &str) -> Result<User, CredentialError> {
        let user = self
            .users
            .find_by_username_or_email(identifier)
            .map_err(CredentialError::Store)?
            .ok_or_else(|| {
                warn!("❌ Sign-in failed: unknown identifier");
                CredentialError::UnknownIdentifier
            })?;

        let matches = verify(password, &user.password_hash)
            .map_err(|e| CredentialError::Store(e.into()))?;
        if !matches {
            warn!("❌ Sign-in failed for {}: password mismatch", user.username);
            return Err(CredentialError::BadPassword);
        }

        if !user.enabled {
            warn!("❌ Sign-in refused for {}: disabled", user.username);
            return Err(CredentialError::Disabled);
        }
        if user.locked {
            warn!("❌ Sign-in refused for {}: locked", user.username);
            return Err(CredentialError::Locked);
        }
        if user.account_expired {
            warn!("❌ Sign-in refused for {}: account expired", user.username);
            return Err(CredentialError::AccountExpired);
        }
        if user.credentials_expired {
            warn!(
                "❌ Sign-in refused for {}: credentials expired",
                user.username
            );
            return Err(CredentialError::CredentialsExpired);
        }

        Ok(user)
    }
}
