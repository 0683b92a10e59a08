//! User Management API Endpoints
//! Mission: Profile and account administration behind JWT auth
//!
//! Authorization is an explicit predicate on the validated claims
//! (`Claims::has_any_role`), evaluated at the top of each handler.

use crate::auth::api::{AuthApiError, AuthState};
use crate::auth::models::{
    ChangePasswordRequest, Claims, MessageResponse, UpdateUserRequest, User, UserResponse,
};
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use tracing::{info, warn};

const MIN_PASSWORD_LEN: usize = 8;

fn internal(err: impl std::fmt::Display) -> AuthApiError {
    warn!("Internal user API error: {}", err);
    AuthApiError::InternalError
}

fn current_user(state: &AuthState, claims: &Claims) -> Result<User, AuthApiError> {
    state
        .users
        .find_by_username_or_email(&claims.sub)
        .map_err(internal)?
        .ok_or(AuthApiError::UserNotFound)
}

/// GET /api/users/me
pub async fn get_current_user(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, AuthApiError> {
    if !claims.has_any_role(&["USER", "ADMIN"]) {
        return Err(AuthApiError::Forbidden);
    }

    let user = current_user(&state, &claims)?;
    Ok(Json(UserResponse::from_user(&user)))
}

/// PUT /api/users/me
pub async fn update_current_user(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AuthApiError> {
    if !claims.has_any_role(&["USER", "ADMIN"]) {
        return Err(AuthApiError::Forbidden);
    }

    let user = current_user(&state, &claims)?;
    apply_update(&state, &user, payload)
}

/// POST /api/users/me/password
///
/// Verifies the old password before installing the new one, then revokes
/// every refresh token the user holds.
pub async fn change_password(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthApiError> {
    if !claims.has_any_role(&["USER", "ADMIN"]) {
        return Err(AuthApiError::Forbidden);
    }
    if payload.new_password.len() < MIN_PASSWORD_LEN {
        return Err(AuthApiError::WeakPassword);
    }

    let user = current_user(&state, &claims)?;

    let matches = verify(&payload.old_password, &user.password_hash).map_err(internal)?;
    if !matches {
        return Err(AuthApiError::InvalidCredentials);
    }

    let new_hash = hash(&payload.new_password, DEFAULT_COST).map_err(internal)?;
    state
        .users
        .set_password_hash(&user.id, &new_hash)
        .map_err(internal)?;
    state
        .refresh_tokens
        .revoke_all_for_user(&user.id)
        .map_err(internal)?;

    info!("🔒 Password changed for {}", user.username);

    Ok(Json(MessageResponse::new("Password changed successfully!")))
}

/// GET /api/users (Admin only)
pub async fn list_users(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<UserResponse>>, AuthApiError> {
    if !claims.has_any_role(&["ADMIN"]) {
        return Err(AuthApiError::Forbidden);
    }

    let users = state.users.list_users().map_err(internal)?;
    let response = users.iter().map(UserResponse::from_user).collect();

    Ok(Json(response))
}

/// GET /api/users/:id (Admin only)
pub async fn get_user(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, AuthApiError> {
    if !claims.has_any_role(&["ADMIN"]) {
        return Err(AuthApiError::Forbidden);
    }

    let user = state
        .users
        .find_by_id(&user_id)
        .map_err(internal)?
        .ok_or(AuthApiError::UserNotFound)?;

    Ok(Json(UserResponse::from_user(&user)))
}

/// PUT /api/users/:id (Admin only)
pub async fn update_user(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AuthApiError> {
    if !claims.has_any_role(&["ADMIN"]) {
        return Err(AuthApiError::Forbidden);
    }

    let user = state
        .users
        .find_by_id(&user_id)
        .map_err(internal)?
        .ok_or(AuthApiError::UserNotFound)?;

    apply_update(&state, &user, payload)
}

/// DELETE /api/users/:id (Admin only)
pub async fn delete_user(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> Result<Json<MessageResponse>, AuthApiError> {
    if !claims.has_any_role(&["ADMIN"]) {
        return Err(AuthApiError::Forbidden);
    }

    let target = state
        .users
        .find_by_id(&user_id)
        .map_err(internal)?
        .ok_or(AuthApiError::UserNotFound)?;

    if target.username == claims.sub {
        return Err(AuthApiError::CannotDeleteSelf);
    }

    if !state.users.delete_user(&user_id).map_err(internal)? {
        return Err(AuthApiError::UserNotFound);
    }

    // Deleting the account also ends its sessions
    state
        .refresh_tokens
        .revoke_all_for_user(&user_id)
        .map_err(internal)?;

    Ok(Json(MessageResponse::new("User deleted successfully!")))
}

fn apply_update(
    state: &AuthState,
    user: &User,
    payload: UpdateUserRequest,
) -> Result<Json<UserResponse>, AuthApiError> {
    if let Some(new_email) = payload.email.as_deref() {
        if new_email != user.email && state.users.exists_by_email(new_email).map_err(internal)? {
            return Err(AuthApiError::EmailTaken);
        }
    }

    let updated = state
        .users
        .update_profile(
            &user.id,
            payload.email.as_deref(),
            payload.first_name.as_deref(),
            payload.last_name.as_deref(),
            payload.phone_number.as_deref(),
        )
        .map_err(internal)?
        .ok_or(AuthApiError::UserNotFound)?;

    Ok(Json(UserResponse::from_user(&updated)))
}
