//! Authentication API Endpoints
//! Mission: Sign-up, sign-in, token refresh, sign-out, and password reset

use crate::auth::{
    models::{
        ForgotPasswordRequest, JwtResponse, LoginRequest, MessageResponse, ResetPasswordRequest,
        SignupRequest, TokenRefreshRequest, TokenRefreshResponse, UserRole,
    },
    notify::Notifier,
    refresh_store::{RefreshError, RefreshTokenStore},
    reset::{PasswordResetManager, ResetError},
    user_store::{NewUser, UserStore},
    verifier::{CredentialError, CredentialVerifier},
    JwtHandler,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

const MIN_PASSWORD_LEN: usize = 8;

/// Shared auth state, assembled once at process start. Components are plain
/// objects taking their collaborators as constructor arguments.
#[derive(Clone)]
pub struct AuthState {
    pub users: Arc<UserStore>,
    pub refresh_tokens: Arc<RefreshTokenStore>,
    pub jwt_handler: Arc<JwtHandler>,
    pub verifier: Arc<CredentialVerifier>,
    pub reset: Arc<PasswordResetManager>,
    pub notifier: Arc<Notifier>,
}

impl AuthState {
    pub fn new(
        users: Arc<UserStore>,
        refresh_tokens: Arc<RefreshTokenStore>,
        jwt_handler: Arc<JwtHandler>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let verifier = Arc::new(CredentialVerifier::new(users.clone()));
        let reset = Arc::new(PasswordResetManager::new(
            users.clone(),
            refresh_tokens.clone(),
            notifier.clone(),
        ));

        Self {
            users,
            refresh_tokens,
            jwt_handler,
            verifier,
            reset,
            notifier,
        }
    }

    pub fn with_reset_ttl(mut self, ttl_secs: i64) -> Self {
        self.reset = Arc::new(
            PasswordResetManager::new(
                self.users.clone(),
                self.refresh_tokens.clone(),
                self.notifier.clone(),
            )
            .with_ttl(ttl_secs),
        );
        self
    }
}

/// Register endpoint - POST /api/auth/signup
pub async fn signup(
    State(state): State<AuthState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<MessageResponse>, AuthApiError> {
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AuthApiError::WeakPassword);
    }

    if state
        .users
        .exists_by_username(&payload.username)
        .map_err(internal)?
    {
        return Err(AuthApiError::UsernameTaken);
    }
    if state
        .users
        .exists_by_email(&payload.email)
        .map_err(internal)?
    {
        return Err(AuthApiError::EmailTaken);
    }

    let user = state
        .users
        .create_user(NewUser {
            username: &payload.username,
            email: &payload.email,
            password: &payload.password,
            roles: vec![UserRole::User],
            first_name: payload.first_name,
            last_name: payload.last_name,
            phone_number: payload.phone_number,
        })
        .map_err(internal)?;

    // Best-effort; a delivery problem must not abort registration
    state.notifier.send_welcome(&user.email, &user.username);

    Ok(Json(MessageResponse::new("User registered successfully!")))
}

/// Sign-in endpoint - POST /api/auth/signin
pub async fn signin(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<JwtResponse>, AuthApiError> {
    let user = state
        .verifier
        .authenticate(&payload.username_or_email, &payload.password)
        .map_err(|e| match e {
            // Internal detail stays in the logs; everything the caller sees
            // is the one generic credential failure.
            CredentialError::Store(err) => internal(err),
            _ => AuthApiError::InvalidCredentials,
        })?;

    let (access_token, expires_in) = state.jwt_handler.issue(&user).map_err(internal)?;
    let refresh_token = state.refresh_tokens.create(&user.id).map_err(internal)?;

    info!("✅ Sign-in successful: {}", user.username);

    Ok(Json(JwtResponse {
        access_token,
        token_type: "Bearer".to_string(),
        refresh_token: refresh_token.token,
        expires_in,
        user_id: user.id.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
        roles: user.role_names(),
    }))
}

/// Refresh endpoint - POST /api/auth/refresh
///
/// Rotates the presented refresh token: the old value is retired and the
/// response carries its replacement alongside the new access token.
pub async fn refresh_token(
    State(state): State<AuthState>,
    Json(payload): Json<TokenRefreshRequest>,
) -> Result<Json<TokenRefreshResponse>, AuthApiError> {
    let token = state
        .refresh_tokens
        .find_valid(&payload.refresh_token)
        .map_err(internal)?
        .ok_or(AuthApiError::RefreshTokenNotFound)?;

    let token = state
        .refresh_tokens
        .verify_expiration(token)
        .map_err(|e| match e {
            RefreshError::Expired => AuthApiError::RefreshTokenExpired,
            RefreshError::Store(err) => internal(err),
        })?;

    // The user must still exist; an orphaned token behaves like a missing one
    let user = state
        .users
        .find_by_id(&token.user_id)
        .map_err(internal)?
        .ok_or(AuthApiError::RefreshTokenNotFound)?;

    let access_token = state
        .jwt_handler
        .issue_from_username(&user.username, &user.role_names())
        .map_err(internal)?;
    // A concurrent signout or revoke between lookup and rotation wins;
    // the refresh then fails instead of reviving the session.
    let replacement = state
        .refresh_tokens
        .rotate(&token.token, &user.id)
        .map_err(internal)?
        .ok_or(AuthApiError::RefreshTokenNotFound)?;

    Ok(Json(TokenRefreshResponse {
        access_token,
        token_type: "Bearer".to_string(),
        refresh_token: replacement.token,
    }))
}

/// Sign-out endpoint - POST /api/auth/signout
///
/// Idempotent revoke: an unknown token still yields success.
pub async fn signout(
    State(state): State<AuthState>,
    Json(payload): Json<TokenRefreshRequest>,
) -> Result<Json<MessageResponse>, AuthApiError> {
    state
        .refresh_tokens
        .delete_by_token(&payload.refresh_token)
        .map_err(internal)?;

    Ok(Json(MessageResponse::new("Sign out successful!")))
}

/// Forgot-password endpoint - POST /api/auth/forgot-password
///
/// Always answers 200 whether or not the email exists (anti-enumeration).
pub async fn forgot_password(
    State(state): State<AuthState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthApiError> {
    state.reset.request_reset(&payload.email).map_err(internal)?;

    Ok(Json(MessageResponse::new(
        "If the email exists, a reset token has been sent",
    )))
}

/// Reset-password endpoint - POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<AuthState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthApiError> {
    if payload.new_password.len() < MIN_PASSWORD_LEN {
        return Err(AuthApiError::WeakPassword);
    }

    state
        .reset
        .consume_reset(&payload.token, &payload.new_password)
        .map_err(|e| match e {
            ResetError::InvalidOrExpired => AuthApiError::ResetTokenInvalidOrExpired,
            ResetError::Store(err) => internal(err),
        })?;

    Ok(Json(MessageResponse::new("Password reset successfully!")))
}

fn internal(err: impl std::fmt::Display) -> AuthApiError {
    warn!("Internal auth error: {}", err);
    AuthApiError::InternalError
}

/// Auth API errors
#[derive(Debug)]
pub enum AuthApiError {
    InvalidCredentials,
    Unauthorized,
    Forbidden,
    RefreshTokenNotFound,
    RefreshTokenExpired,
    ResetTokenInvalidOrExpired,
    UsernameTaken,
    EmailTaken,
    WeakPassword,
    UserNotFound,
    CannotDeleteSelf,
    InternalError,
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid username or password")
            }
            AuthApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthApiError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions"),
            AuthApiError::RefreshTokenNotFound => {
                (StatusCode::FORBIDDEN, "Refresh token not found")
            }
            AuthApiError::RefreshTokenExpired => (
                StatusCode::FORBIDDEN,
                "Refresh token expired. Please sign in again",
            ),
            AuthApiError::ResetTokenInvalidOrExpired => (
                StatusCode::BAD_REQUEST,
                "Invalid or expired password reset token",
            ),
            AuthApiError::UsernameTaken => (StatusCode::CONFLICT, "Username is already taken"),
            AuthApiError::EmailTaken => (StatusCode::CONFLICT, "Email is already in use"),
            AuthApiError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                "Password must be at least 8 characters",
            ),
            AuthApiError::UserNotFound => (StatusCode::NOT_FOUND, "User not found"),
            AuthApiError::CannotDeleteSelf => {
                (StatusCode::BAD_REQUEST, "Cannot delete your own account")
            }
            AuthApiError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_api_error_responses() {
        let invalid_creds = AuthApiError::InvalidCredentials.into_response();
        assert_eq!(invalid_creds.status(), StatusCode::UNAUTHORIZED);

        // Both refresh failures are 403 and terminate the refresh flow
        let not_found = AuthApiError::RefreshTokenNotFound.into_response();
        assert_eq!(not_found.status(), StatusCode::FORBIDDEN);
        let expired = AuthApiError::RefreshTokenExpired.into_response();
        assert_eq!(expired.status(), StatusCode::FORBIDDEN);

        let reset = AuthApiError::ResetTokenInvalidOrExpired.into_response();
        assert_eq!(reset.status(), StatusCode::BAD_REQUEST);

        let taken = AuthApiError::UsernameTaken.into_response();
        assert_eq!(taken.status(), StatusCode::CONFLICT);
    }
}
