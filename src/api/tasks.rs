use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{ApiError, ApiResult, JsonBody, SharedState};
use crate::auth::AuthUser;
use crate::errors::Error;
use crate::models::{NewTask, TaskItemUpdate, TaskUpdate};
use crate::whatsapp::parser::parse_color;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    /// `open`, `completed` or `all` (default).
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateItemRequest {
    pub title: String,
}

fn normalize_color(color: Option<String>) -> ApiResult<Option<String>> {
    color
        .map(|c| {
            parse_color(c.trim()).ok_or_else(|| ApiError::Validation {
                field: "color".into(),
                message: format!("'{}' is not a #RRGGBB colour", c),
            })
        })
        .transpose()
}

fn check_estimate(hours: Option<f64>) -> ApiResult<()> {
    match hours {
        Some(h) if !h.is_finite() || h < 0.0 => Err(ApiError::Validation {
            field: "estimatedHours".into(),
            message: "must be a non-negative number".into(),
        }),
        _ => Ok(()),
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────

pub async fn list_tasks(
    State(state): State<SharedState>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let status = query.status.unwrap_or_else(|| "all".into());
    let keep: fn(&crate::models::Task) -> bool = match status.as_str() {
        "open" => |t| t.is_open(),
        "completed" => |t| t.is_completed,
        "all" => |_| true,
        other => {
            return Err(ApiError::Validation {
                field: "status".into(),
                message: format!("'{}' is not one of open, completed, all", other),
            });
        }
    };
    let tasks = state.store.call(move |s| s.tasks_with_stats(now)).await?;
    let tasks: Vec<_> = tasks.into_iter().filter(|t| keep(&t.task)).collect();
    Ok(Json(tasks))
}

pub async fn create_task(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
    JsonBody(mut req): JsonBody<NewTask>,
) -> ApiResult<impl IntoResponse> {
    check_estimate(req.estimated_hours)?;
    req.color = normalize_color(req.color)?;
    req.user_id = user.map(|Extension(u)| u.id);
    let task = state.store.call(move |s| s.create_task(req)).await?;
    tracing::info!(task_id = task.id, name = %task.name, "Task created");
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let task = state
        .store
        .call(move |s| s.task_with_stats(id, now))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", id)))?;
    Ok(Json(task))
}

pub async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    JsonBody(mut req): JsonBody<TaskUpdate>,
) -> ApiResult<impl IntoResponse> {
    check_estimate(req.estimated_hours.flatten())?;
    req.color = normalize_color(req.color)?;
    let task = state.store.call(move |s| s.update_task(id, req)).await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.store.call(move |s| s.delete_task(id)).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Task {} not found", id)));
    }
    tracing::info!(task_id = id, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let task = state
        .store
        .call(move |s| s.set_task_completion(id, Some(now)))
        .await?;
    Ok(Json(task))
}

pub async fn reopen_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .store
        .call(move |s| s.set_task_completion(id, None))
        .await?;
    Ok(Json(task))
}

// ── Task items ────────────────────────────────────────────────────────

pub async fn list_items(
    State(state): State<SharedState>,
    Path(task_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let items = state
        .store
        .call(move |s| {
            if s.get_task(task_id)?.is_none() {
                return Err(Error::not_found("Task", task_id));
            }
            s.list_task_items(task_id)
        })
        .await?;
    Ok(Json(items))
}

pub async fn create_item(
    State(state): State<SharedState>,
    Path(task_id): Path<i64>,
    JsonBody(req): JsonBody<CreateItemRequest>,
) -> ApiResult<impl IntoResponse> {
    let item = state
        .store
        .call(move |s| s.create_task_item(task_id, &req.title))
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn complete_all_items(
    State(state): State<SharedState>,
    Path(task_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let updated = state
        .store
        .call(move |s| s.complete_all_task_items(task_id))
        .await?;
    Ok(Json(serde_json::json!({"updated": updated})))
}

pub async fn update_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<TaskItemUpdate>,
) -> ApiResult<impl IntoResponse> {
    let item = state.store.call(move |s| s.update_task_item(id, req)).await?;
    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.store.call(move |s| s.delete_task_item(id)).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Task item {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
