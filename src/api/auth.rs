use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{ApiError, ApiResult, JsonBody, SharedState, caller};
use crate::auth::{self, AuthUser, password};
use crate::errors::Error;
use crate::models::{NewUser, Role, User, UserProfile, UserUpdate};

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Token, expiry and profile for a freshly authenticated user.
fn session(state: &SharedState, user: &User) -> ApiResult<Value> {
    let (token, exp) = state.jwt.issue(user).map_err(|e| {
        tracing::error!(error = %e, "Failed to issue token");
        ApiError::Internal("Failed to issue token".into())
    })?;
    Ok(json!({
        "token": token,
        "expiresAt": DateTime::<Utc>::from_timestamp(exp, 0),
        "user": UserProfile::from(user),
    }))
}

// ── Public routes ─────────────────────────────────────────────────────

pub async fn status(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    let users = state.store.call(|s| s.count_users()).await?;
    Ok(Json(json!({
        "needsSetup": users == 0,
        "authRequired": state.auth.required,
    })))
}

/// Create the first account. It is always an admin.
pub async fn setup(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<SetupRequest>,
) -> ApiResult<impl IntoResponse> {
    password::check_password_policy(&req.password)?;
    let password_hash = password::hash_password(&req.password)?;
    let new = NewUser {
        username: crate::store::require_name(&req.username)
            .map_err(|_| Error::validation("username", "must not be empty"))?,
        password_hash,
        email: req.email,
        full_name: req.full_name,
        role: Role::Admin,
        api_key: Some(auth::generate_api_key()),
        must_reset_password: false,
    };
    let user = state
        .store
        .call(move |s| {
            if s.count_users()? > 0 {
                return Err(Error::Forbidden("Setup already completed".into()));
            }
            s.create_user(new)
        })
        .await?;
    info!(user_id = user.id, username = %user.username, "Initial admin created");
    Ok((StatusCode::CREATED, Json(session(&state, &user)?)))
}

pub async fn login(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let user = state
        .store
        .call(move |s| {
            let user = s
                .find_user_by_username(req.username.trim())?
                .filter(|u| password::verify_password(&req.password, &u.password_hash))
                .ok_or_else(|| Error::Unauthorized("Invalid credentials".into()))?;
            if !user.is_active {
                return Err(Error::Unauthorized("Account is disabled".into()));
            }
            s.update_user(
                user.id,
                UserUpdate {
                    last_login: Some(now),
                    ..Default::default()
                },
            )
        })
        .await?;
    info!(user_id = user.id, "User logged in");
    Ok(Json(session(&state, &user)?))
}

/// Always answers the same way so usernames cannot be probed. The raw token
/// goes to the server log; only its hash is stored.
pub async fn forgot_password(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<ForgotPasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    let token = auth::generate_reset_token();
    let hashed = auth::hash_token(&token);
    let expires = state.now() + Duration::seconds(state.auth.reset_token_ttl_secs);
    let username = req.username.trim().to_string();
    let issued_for = state
        .store
        .call(move |s| {
            let Some(user) = s.find_user_by_username(&username)?.filter(|u| u.is_active) else {
                return Ok(None);
            };
            s.update_user(
                user.id,
                UserUpdate {
                    reset_token: Some(Some((hashed, expires))),
                    ..Default::default()
                },
            )?;
            Ok(Some(user.username))
        })
        .await?;
    match issued_for {
        Some(username) => info!(%username, reset_token = %token, %expires, "Password reset token issued"),
        None => warn!("Password reset requested for unknown or inactive account"),
    }
    Ok(Json(json!({
        "message": "If the account exists, a reset token has been issued"
    })))
}

pub async fn reset_password(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<ResetPasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    password::check_password_policy(&req.new_password)?;
    let password_hash = password::hash_password(&req.new_password)?;
    let hashed = auth::hash_token(req.token.trim());
    let now = state.now();
    let user = state
        .store
        .call(move |s| {
            let user = s
                .find_user_by_reset_token(&hashed)?
                .filter(|u| u.reset_token_expires_at.is_some_and(|exp| exp > now))
                .ok_or_else(|| Error::conflict("Invalid or expired reset token"))?;
            s.update_user(
                user.id,
                UserUpdate {
                    password_hash: Some(password_hash),
                    must_reset_password: Some(false),
                    reset_token: Some(None),
                    ..Default::default()
                },
            )
        })
        .await?;
    info!(user_id = user.id, "Password reset");
    Ok(Json(json!({"message": "Password updated"})))
}

// ── Account routes ────────────────────────────────────────────────────

async fn current_user(state: &SharedState, who: &AuthUser) -> ApiResult<User> {
    let id = who.id;
    state
        .store
        .call(move |s| s.get_user(id))
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".into()))
}

pub async fn me(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
) -> ApiResult<impl IntoResponse> {
    let who = caller(user)?;
    let user = current_user(&state, &who).await?;
    Ok(Json(UserProfile::from(&user)))
}

pub async fn change_password(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
    JsonBody(req): JsonBody<ChangePasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    let who = caller(user)?;
    let current = current_user(&state, &who).await?;
    if !password::verify_password(&req.current_password, &current.password_hash) {
        return Err(ApiError::Validation {
            field: "currentPassword".into(),
            message: "is incorrect".into(),
        });
    }
    password::check_password_policy(&req.new_password)?;
    let password_hash = password::hash_password(&req.new_password)?;
    state
        .store
        .call(move |s| {
            s.update_user(
                who.id,
                UserUpdate {
                    password_hash: Some(password_hash),
                    must_reset_password: Some(false),
                    ..Default::default()
                },
            )
        })
        .await?;
    Ok(Json(json!({"message": "Password updated"})))
}

pub async fn regenerate_api_key(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
) -> ApiResult<impl IntoResponse> {
    let who = caller(user)?;
    let key = auth::generate_api_key();
    let stored = key.clone();
    state
        .store
        .call(move |s| {
            s.update_user(
                who.id,
                UserUpdate {
                    api_key: Some(Some(stored)),
                    ..Default::default()
                },
            )
        })
        .await?;
    Ok(Json(json!({"apiKey": key})))
}
