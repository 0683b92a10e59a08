//! Authentication Models
//! Mission: Define secure user, token, and authentication data structures

use serde::{Deserialize, Serialize};

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub roles: Vec<UserRole>,
    pub enabled: bool,
    pub locked: bool,
    pub account_expired: bool,
    pub credentials_expired: bool,
    #[serde(skip_serializing)]
    pub password_reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub password_reset_expiry: Option<i64>, // unix seconds
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: String,
}

impl User {
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.as_str().to_string()).collect()
    }

    pub fn has_role(&self, role: UserRole) -> bool {
        self.roles.contains(&role)
    }
}

/// User roles for RBAC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "ADMIN")]
    Admin, // Full access including user management
    #[serde(rename = "USER")]
    User, // Standard authenticated access
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::User => "USER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Some(UserRole::Admin),
            "USER" => Some(UserRole::User),
            _ => None,
        }
    }

    /// Encode a role set as the comma-separated form stored in SQLite.
    pub fn encode_set(roles: &[UserRole]) -> String {
        roles
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Decode the comma-separated form stored in SQLite.
    pub fn decode_set(s: &str) -> Vec<UserRole> {
        s.split(',')
            .filter_map(|part| UserRole::from_str(part.trim()))
            .collect()
    }
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (username)
    pub roles: Vec<String>,
    pub iat: usize, // issued-at timestamp
    pub exp: usize, // expiration timestamp
}

impl Claims {
    /// Explicit authorization predicate evaluated by handlers.
    pub fn has_any_role(&self, allowed: &[&str]) -> bool {
        self.roles.iter().any(|r| allowed.contains(&r.as_str()))
    }
}

/// Refresh token record (persisted, opaque)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub user_id: String,
    pub expiry: i64, // unix seconds
}

impl RefreshToken {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry <= now
    }
}

/// Sign-in request body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

/// Sign-in response: access + refresh token pair plus identity summary
#[derive(Debug, Serialize)]
pub struct JwtResponse {
    pub access_token: String,
    pub token_type: String, // always "Bearer"
    pub refresh_token: String,
    pub expires_in: usize, // seconds until access token expiration
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
}

/// Sign-up request body
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// Refresh / sign-out request body
#[derive(Debug, Deserialize)]
pub struct TokenRefreshRequest {
    pub refresh_token: String,
}

/// Refresh response: new access token plus the rotated refresh token
#[derive(Debug, Serialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: String,
}

/// Forgot-password request body
#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Reset-password request body
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Change-password request body (authenticated)
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Profile update request body
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// User response (sanitized)
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            roles: user.role_names(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone_number: user.phone_number.clone(),
            created_at: user.created_at.clone(),
        }
    }
}

/// Generic message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
