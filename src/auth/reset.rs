//! Password Reset Token Manager
//! Mission: Issue and consume single-use, time-bounded reset tokens

use crate::auth::notify::Notifier;
use crate::auth::refresh_store::RefreshTokenStore;
use crate::auth::user_store::UserStore;
use anyhow::Result;
use bcrypt::{hash, DEFAULT_COST};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Reset tokens expire after one hour.
pub const DEFAULT_RESET_TTL_SECS: i64 = 3600;

#[derive(Debug)]
pub enum ResetError {
    /// Wrong token, or a real token past its expiry. The two causes are
    /// deliberately indistinguishable to the caller.
    InvalidOrExpired,
    Store(anyhow::Error),
}

impl fmt::Display for ResetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetError::InvalidOrExpired => write!(f, "invalid or expired reset token"),
            ResetError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

/// Issues and consumes password-reset tokens stored on the user row
pub struct PasswordResetManager {
    users: Arc<UserStore>,
    refresh_tokens: Arc<RefreshTokenStore>,
    notifier: Arc<Notifier>,
    ttl_secs: i64,
}

impl PasswordResetManager {
    pub fn new(
        users: Arc<UserStore>,
        refresh_tokens: Arc<RefreshTokenStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            users,
            refresh_tokens,
            notifier,
            ttl_secs: DEFAULT_RESET_TTL_SECS,
        }
    }

    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Issue a reset token for the account behind `email`, if any.
    ///
    /// Anti-enumeration: an unknown email performs no state change but the
    /// call still succeeds, so responses are indistinguishable either way.
    pub fn request_reset(&self, email: &str) -> Result<()> {
        let Some(user) = self.users.find_by_email(email)? else {
            // No hint to the caller that nothing happened
            return Ok(());
        };

        let token = Uuid::new_v4().to_string();
        let expiry = Utc::now().timestamp() + self.ttl_secs;
        self.users.set_reset_token(&user.id, &token, expiry)?;

        info!("🔑 Reset token issued for {}", user.username);
        self.notifier.send_reset_token(&user.email, &token);

        Ok(())
    }

    /// Consume a reset token and install the new password.
    ///
    /// The store clears the token pair atomically with the password change;
    /// as a compromise response, every refresh token the user holds is also
    /// revoked.
    pub fn consume_reset(&self, token: &str, new_password: &str) -> Result<(), ResetError> {
        let new_hash = hash(new_password, DEFAULT_COST)
            .map_err(|e| ResetError::Store(e.into()))?;

        let user_id = self
            .users
            .consume_reset_token(token, &new_hash, Utc::now().timestamp())
            .map_err(ResetError::Store)?
            .ok_or_else(|| {
                warn!("❌ Reset attempt with invalid or expired token");
                ResetError::InvalidOrExpired
            })?;

        self.refresh_tokens
            .revoke_all_for_user(&user_id)
            .map_err(ResetError::Store)?;

        info!("✅ Password reset completed for user {}", user_id);
        Ok(())
    }
}
