use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

use super::{ApiError, ApiResult, JsonBody, SharedState, admin};
use crate::auth::{AuthUser, password};
use crate::models::{NewUser, Role, UserProfile, UserUpdate};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub must_reset_password: bool,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub password: Option<String>,
    pub must_reset_password: Option<bool>,
}

pub async fn list_users(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
) -> ApiResult<impl IntoResponse> {
    admin(user)?;
    let users = state.store.call(|s| s.list_users()).await?;
    let profiles: Vec<UserProfile> = users.iter().map(UserProfile::from).collect();
    Ok(Json(profiles))
}

pub async fn create_user(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
    JsonBody(req): JsonBody<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    admin(user)?;
    let username = req.username.trim().to_string();
    if username.is_empty() {
        return Err(ApiError::Validation {
            field: "username".into(),
            message: "must not be empty".into(),
        });
    }
    password::check_password_policy(&req.password)?;
    let new = NewUser {
        username,
        password_hash: password::hash_password(&req.password)?,
        email: req.email,
        full_name: req.full_name,
        role: req.role,
        api_key: None,
        must_reset_password: req.must_reset_password,
    };
    let created = state.store.call(move |s| s.create_user(new)).await?;
    info!(user_id = created.id, username = %created.username, role = created.role.as_str(), "User created");
    Ok((StatusCode::CREATED, Json(UserProfile::from(&created))))
}

pub async fn update_user(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let me = admin(user)?;
    if me.id == id && (req.is_active == Some(false) || req.role == Some(Role::User)) {
        return Err(ApiError::BadRequest(
            "Cannot deactivate or demote your own account".into(),
        ));
    }
    let password_hash = match req.password.as_deref() {
        Some(p) => {
            password::check_password_policy(p)?;
            Some(password::hash_password(p)?)
        }
        None => None,
    };
    let update = UserUpdate {
        password_hash,
        email: req.email.map(Some),
        full_name: req.full_name.map(Some),
        role: req.role,
        is_active: req.is_active,
        must_reset_password: req.must_reset_password,
        ..Default::default()
    };
    let updated = state.store.call(move |s| s.update_user(id, update)).await?;
    Ok(Json(UserProfile::from(&updated)))
}

pub async fn delete_user(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let me = admin(user)?;
    if me.id == id {
        return Err(ApiError::BadRequest("Cannot delete your own account".into()));
    }
    let deleted = state.store.call(move |s| s.delete_user(id)).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("User {} not found", id)));
    }
    info!(user_id = id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}
