//! Refresh Token Storage
//! Mission: Persist and rotate long-lived opaque refresh tokens

use crate::auth::models::RefreshToken;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

/// Default refresh-token lifetime: 7 days, independent of and much longer
/// than the access-token TTL.
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 3600;

/// Refresh failure detail for the refresh flow
#[derive(Debug)]
pub enum RefreshError {
    /// The token expired; the record has been deleted and the caller must
    /// require a fresh sign-in, not retry.
    Expired,
    Store(anyhow::Error),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::Expired => write!(f, "refresh token expired"),
            RefreshError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

/// Refresh token storage with SQLite backend
pub struct RefreshTokenStore {
    db_path: String,
    ttl_secs: i64,
}

impl RefreshTokenStore {
    pub fn new(db_path: &str) -> Result<Self> {
        Self::with_ttl(db_path, DEFAULT_REFRESH_TTL_SECS)
    }

    pub fn with_ttl(db_path: &str, ttl_secs: i64) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
            ttl_secs,
        };
        store.init_db()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("Failed to open auth database")
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS refresh_tokens (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expiry INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user
             ON refresh_tokens(user_id)",
            [],
        )?;
        Ok(())
    }

    /// Mint and persist a new opaque token for a user. Multiple live tokens
    /// per user are permitted (one per session).
    pub fn create(&self, user_id: &str) -> Result<RefreshToken> {
        let token = RefreshToken {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            expiry: Utc::now().timestamp() + self.ttl_secs,
        };

        let conn = self.open()?;
        conn.execute(
            "INSERT INTO refresh_tokens (token, user_id, expiry) VALUES (?1, ?2, ?3)",
            params![token.token, token.user_id, token.expiry],
        )
        .context("Failed to insert refresh token")?;

        debug!("Issued refresh token for user {}", user_id);
        Ok(token)
    }

    /// Look up by value, filtering on `expiry > now` in the same query: an
    /// expired-but-not-yet-swept record is never returned as valid.
    pub fn find_valid(&self, token: &str) -> Result<Option<RefreshToken>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT token, user_id, expiry FROM refresh_tokens
             WHERE token = ?1 AND expiry > ?2",
        )?;

        stmt.query_row(params![token, Utc::now().timestamp()], |row| {
            Ok(RefreshToken {
                token: row.get(0)?,
                user_id: row.get(1)?,
                expiry: row.get(2)?,
            })
        })
        .optional()
        .context("Failed to look up refresh token")
    }

    /// Explicit re-check guarding the gap between lookup and use. On expiry
    /// the record is deleted and the caller gets a terminal error.
    pub fn verify_expiration(&self, token: RefreshToken) -> Result<RefreshToken, RefreshError> {
        if token.is_expired(Utc::now().timestamp()) {
            self.delete_by_token(&token.token)
                .map_err(RefreshError::Store)?;
            return Err(RefreshError::Expired);
        }
        Ok(token)
    }

    /// Rotate on use: atomically retire the presented token and issue its
    /// replacement, bounding replay of a leaked token to a single use.
    ///
    /// The replacement is only inserted when the presented token was still
    /// live inside the transaction. Returns None when it was not: a refresh
    /// racing a signout or bulk revoke must not resurrect the session.
    pub fn rotate(&self, old_token: &str, user_id: &str) -> Result<Option<RefreshToken>> {
        let replacement = RefreshToken {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            expiry: Utc::now().timestamp() + self.ttl_secs,
        };

        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let retired = tx.execute(
            "DELETE FROM refresh_tokens WHERE token = ?1",
            params![old_token],
        )?;
        if retired == 0 {
            return Ok(None);
        }
        tx.execute(
            "INSERT INTO refresh_tokens (token, user_id, expiry) VALUES (?1, ?2, ?3)",
            params![replacement.token, replacement.user_id, replacement.expiry],
        )?;
        tx.commit().context("Failed to rotate refresh token")?;

        debug!("Rotated refresh token for user {}", user_id);
        Ok(Some(replacement))
    }

    /// Idempotent revoke-on-logout; absence of the token is not an error
    pub fn delete_by_token(&self, token: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "DELETE FROM refresh_tokens WHERE token = ?1",
            params![token],
        )
        .context("Failed to delete refresh token")?;
        Ok(())
    }

    /// Bulk revoke for a user (password change / compromise response)
    pub fn revoke_all_for_user(&self, user_id: &str) -> Result<usize> {
        let conn = self.open()?;
        let rows = conn.execute(
            "DELETE FROM refresh_tokens WHERE user_id = ?1",
            params![user_id],
        )?;

        if rows > 0 {
            info!("🔒 Revoked {} refresh token(s) for user {}", rows, user_id);
        }
        Ok(rows)
    }

    /// Bulk-delete all records with `expiry <= now`. Runs from a periodic
    /// background task, never on the request path.
    pub fn sweep_expired(&self, now: i64) -> Result<usize> {
        let conn = self.open()?;
        let rows = conn.execute(
            "DELETE FROM refresh_tokens WHERE expiry <= ?1",
            params![now],
        )?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (RefreshTokenStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = RefreshTokenStore::new(temp_file.path().to_str().unwrap()).unwrap();
        (store, temp_file)
    }

    fn expired_store(temp: &NamedTempFile) -> RefreshTokenStore {
        // Negative TTL creates already-expired tokens
        RefreshTokenStore::with_ttl(temp.path().to_str().unwrap(), -10).unwrap()
    }

    #[test]
    fn test_create_and_find_valid() {
        let (store, _temp) = create_test_store();

        let token = store.create("user-1").unwrap();
        let found = store.find_valid(&token.token).unwrap().unwrap();

        assert_eq!(found.token, token.token);
        assert_eq!(found.user_id, "user-1");
        assert!(store.find_valid("no-such-token").unwrap().is_none());
    }

    #[test]
    fn test_expired_token_invisible_without_sweep() {
        let (_store, temp) = create_test_store();
        let store = expired_store(&temp);

        let token = store.create("user-1").unwrap();
        assert!(store.find_valid(&token.token).unwrap().is_none());
    }

    #[test]
    fn test_verify_expiration_deletes_expired() {
        let (fresh, temp) = create_test_store();
        let stale = expired_store(&temp);

        let token = stale.create("user-1").unwrap();
        assert!(matches!(
            stale.verify_expiration(token.clone()),
            Err(RefreshError::Expired)
        ));

        // The record is gone even for a store whose clock would accept it
        let conn = Connection::open(temp.path()).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM refresh_tokens WHERE token = ?1",
                params![token.token],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);

        let live = fresh.create("user-1").unwrap();
        assert!(fresh.verify_expiration(live).is_ok());
    }

    #[test]
    fn test_rotate_retires_old_token() {
        let (store, _temp) = create_test_store();

        let old = store.create("user-1").unwrap();
        let new = store.rotate(&old.token, "user-1").unwrap().unwrap();

        assert_ne!(old.token, new.token);
        assert!(store.find_valid(&old.token).unwrap().is_none());
        assert!(store.find_valid(&new.token).unwrap().is_some());
    }

    #[test]
    fn test_rotate_after_revoke_does_not_resurrect_session() {
        let (store, temp) = create_test_store();

        let token = store.create("user-1").unwrap();
        store.delete_by_token(&token.token).unwrap();

        // The token was revoked between lookup and rotation
        assert!(store.rotate(&token.token, "user-1").unwrap().is_none());

        // No replacement was inserted for the user
        let conn = Connection::open(temp.path()).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM refresh_tokens WHERE user_id = 'user-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_delete_by_token_idempotent() {
        let (store, _temp) = create_test_store();

        let token = store.create("user-1").unwrap();
        store.delete_by_token(&token.token).unwrap();
        assert!(store.find_valid(&token.token).unwrap().is_none());

        // Deleting again is not an error
        store.delete_by_token(&token.token).unwrap();
    }

    #[test]
    fn test_revoke_all_for_user() {
        let (store, _temp) = create_test_store();

        let a1 = store.create("user-a").unwrap();
        let a2 = store.create("user-a").unwrap();
        let b = store.create("user-b").unwrap();

        assert_eq!(store.revoke_all_for_user("user-a").unwrap(), 2);
        assert!(store.find_valid(&a1.token).unwrap().is_none());
        assert!(store.find_valid(&a2.token).unwrap().is_none());
        assert!(store.find_valid(&b.token).unwrap().is_some());
    }

    #[test]
    fn test_sweep_expired() {
        let (fresh, temp) = create_test_store();
        let stale = expired_store(&temp);

        stale.create("user-1").unwrap();
        stale.create("user-2").unwrap();
        let live = fresh.create("user-3").unwrap();

        let swept = fresh.sweep_expired(Utc::now().timestamp()).unwrap();
        assert_eq!(swept, 2);
        assert!(fresh.find_valid(&live.token).unwrap().is_some());
    }
}
