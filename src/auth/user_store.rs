//! User Storage
//! Mission: Securely store and manage user accounts with SQLite

use crate::auth::models::{User, UserRole};
use anyhow::{Context, Result};
use bcrypt::{hash, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, email, password_hash, roles, enabled, locked, \
     account_expired, credentials_expired, password_reset_token, password_reset_expiry, \
     first_name, last_name, phone_number, created_at";

/// New-account parameters for [`UserStore::create_user`]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub roles: Vec<UserRole>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
}

impl UserStore {
    /// Create a new user store, initialize the schema, and seed defaults
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
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
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                roles TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                locked INTEGER NOT NULL DEFAULT 0,
                account_expired INTEGER NOT NULL DEFAULT 0,
                credentials_expired INTEGER NOT NULL DEFAULT 0,
                password_reset_token TEXT,
                password_reset_expiry INTEGER,
                first_name TEXT,
                last_name TEXT,
                phone_number TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.seed_default_users(&conn)?;

        Ok(())
    }

    /// Seed default admin + user accounts for initial setup
    fn seed_default_users(&self, conn: &Connection) -> Result<()> {
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")?;

        if count > 0 {
            return Ok(());
        }

        let seeds = [
            (
                "admin",
                "admin@example.com",
                "admin123",
                vec![UserRole::User, UserRole::Admin],
            ),
            (
                "user",
                "user@example.com",
                "user123",
                vec![UserRole::User],
            ),
        ];

        for (username, email, password, roles) in seeds {
            let password_hash = hash(password, DEFAULT_COST).context("Failed to hash password")?;
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, roles, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    username,
                    email,
                    password_hash,
                    UserRole::encode_set(&roles),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("Failed to seed default user")?;

            info!("🔐 Default account created: {}", username);
        }

        warn!("⚠️  CHANGE DEFAULT PASSWORDS IN PRODUCTION!");
        Ok(())
    }

    fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        let roles_str: String = row.get(4)?;
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            roles: UserRole::decode_set(&roles_str),
            enabled: row.get(5)?,
            locked: row.get(6)?,
            account_expired: row.get(7)?,
            credentials_expired: row.get(8)?,
            password_reset_token: row.get(9)?,
            password_reset_expiry: row.get(10)?,
            first_name: row.get(11)?,
            last_name: row.get(12)?,
            phone_number: row.get(13)?,
            created_at: row.get(14)?,
        })
    }

    /// Single lookup matching either username or email, without revealing
    /// which one matched.
    pub fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<User>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR email = ?1"
        ))?;

        stmt.query_row(params![identifier], Self::user_from_row)
            .optional()
            .context("Failed to look up user")
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1"
        ))?;

        stmt.query_row(params![email], Self::user_from_row)
            .optional()
            .context("Failed to look up user by email")
    }

    pub fn find_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;

        stmt.query_row(params![user_id], Self::user_from_row)
            .optional()
            .context("Failed to look up user by id")
    }

    pub fn exists_by_username(&self, username: &str) -> Result<bool> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn exists_by_email(&self, email: &str) -> Result<bool> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Create a new user account with a bcrypt-hashed password
    pub fn create_user(&self, new: NewUser<'_>) -> Result<User> {
        let password_hash = hash(new.password, DEFAULT_COST).context("Failed to hash password")?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: new.username.to_string(),
            email: new.email.to_string(),
            password_hash,
            roles: new.roles,
            enabled: true,
            locked: false,
            account_expired: false,
            credentials_expired: false,
            password_reset_token: None,
            password_reset_expiry: None,
            first_name: new.first_name,
            last_name: new.last_name,
            phone_number: new.phone_number,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = self.open()?;
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, roles,
                                first_name, last_name, phone_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                UserRole::encode_set(&user.roles),
                user.first_name,
                user.last_name,
                user.phone_number,
                user.created_at,
            ],
        )
        .context("Failed to insert user")?;

        info!("✅ Created user: {}", user.username);

        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users"))?;

        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    /// Delete a user by id; returns false when no such user exists
    pub fn delete_user(&self, user_id: &str) -> Result<bool> {
        let conn = self.open()?;
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;

        if rows > 0 {
            info!("🗑️  Deleted user: {}", user_id);
        }
        Ok(rows > 0)
    }

    /// Apply a partial profile update; returns the updated user, or None when
    /// the id is unknown. Email uniqueness is the caller's concern.
    pub fn update_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Option<User>> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE users SET
                email = COALESCE(?2, email),
                first_name = COALESCE(?3, first_name),
                last_name = COALESCE(?4, last_name),
                phone_number = COALESCE(?5, phone_number)
             WHERE id = ?1",
            params![user_id, email, first_name, last_name, phone_number],
        )
        .context("Failed to update user")?;

        self.find_by_id(user_id)
    }

    /// Replace the stored password hash (already bcrypt-hashed by the caller)
    pub fn set_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE users SET password_hash = ?2 WHERE id = ?1",
            params![user_id, password_hash],
        )
        .context("Failed to update password")?;
        Ok(())
    }

    /// Store a reset token on the user row. A new token overwrites any prior
    /// one: at most one outstanding reset token per user.
    pub fn set_reset_token(&self, user_id: &str, token: &str, expiry: i64) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE users SET password_reset_token = ?2, password_reset_expiry = ?3
             WHERE id = ?1",
            params![user_id, token, expiry],
        )
        .context("Failed to store reset token")?;
        Ok(())
    }

    /// Consume a reset token: one statement sets the new hash and clears the
    /// token pair, so a reader never observes the new password with the old
    /// token still active. Returns the affected user id, or None when the
    /// token is unknown or expired (indistinguishable by design).
    pub fn consume_reset_token(
        &self,
        token: &str,
        new_password_hash: &str,
        now: i64,
    ) -> Result<Option<String>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "UPDATE users SET password_hash = ?2,
                              password_reset_token = NULL,
                              password_reset_expiry = NULL
             WHERE password_reset_token = ?1 AND password_reset_expiry > ?3
             RETURNING id",
        )?;

        stmt.query_row(params![token, new_password_hash, now], |row| row.get(0))
            .optional()
            .context("Failed to consume reset token")
    }

    /// Update account-status flags (admin / operational use)
    pub fn set_status_flags(
        &self,
        user_id: &str,
        enabled: bool,
        locked: bool,
        account_expired: bool,
        credentials_expired: bool,
    ) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE users SET enabled = ?2, locked = ?3, account_expired = ?4,
                              credentials_expired = ?5
             WHERE id = ?1",
            params![
                user_id,
                enabled,
                locked,
                account_expired,
                credentials_expired
            ],
        )
        .context("Failed to update status flags")?;
        Ok(())
    }
}
