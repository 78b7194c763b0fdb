use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, JsonBody, SharedState, parse_instant};
use crate::auth::AuthUser;
use crate::errors::Error;
use crate::models::{EntryFilter, EntryState, NewTimeEntry, TimeEntry, TimeEntryUpdate};
use crate::timer;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntryQuery {
    pub task_id: Option<i64>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Manual entry. Either `startTime` + `endTime` or just `duration` seconds.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntryRequest {
    pub task_id: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntryRequest {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<i64>,
}

/// An active entry plus what a running-timer widget needs to render it.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningEntry {
    #[serde(flatten)]
    pub entry: TimeEntry,
    pub task_name: String,
    pub task_color: String,
    pub elapsed: i64,
}

fn invalid(field: &str, message: &str) -> ApiError {
    ApiError::Validation {
        field: field.into(),
        message: message.into(),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

pub async fn list_entries(
    State(state): State<SharedState>,
    Query(query): Query<EntryQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = EntryFilter {
        task_id: query.task_id,
        from: query.from.as_deref().map(|v| parse_instant("from", v)).transpose()?,
        to: query.to.as_deref().map(|v| parse_instant("to", v)).transpose()?,
    };
    let entries = state
        .store
        .call(move |s| s.list_time_entries(&filter))
        .await?;
    Ok(Json(entries))
}

pub async fn create_entry(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
    JsonBody(req): JsonBody<CreateEntryRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let user_id = user.map(|Extension(u)| u.id);

    let entry = match (req.start_time, req.end_time, req.duration) {
        (Some(start), Some(end), _) => {
            if end < start {
                return Err(invalid("endTime", "must not be before startTime"));
            }
            let new = NewTimeEntry {
                task_id: req.task_id,
                start_time: start,
                end_time: Some(end),
                duration: Some((end - start).num_seconds()),
                state: EntryState::Finished,
                notes: req.notes,
                user_id,
            };
            state
                .store
                .call(move |s| {
                    if s.get_task(new.task_id)?.is_none() {
                        return Err(Error::not_found("Task", new.task_id));
                    }
                    s.create_time_entry(new)
                })
                .await?
        }
        (None, None, Some(seconds)) => {
            state
                .store
                .call(move |s| timer::log_time(s, req.task_id, seconds, req.notes, user_id, now))
                .await?
        }
        _ => {
            return Err(invalid(
                "startTime",
                "provide startTime and endTime, or duration alone",
            ));
        }
    };
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn running_entries(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let running = state
        .store
        .call(move |s| {
            let active = s.active_time_entries()?;
            let mut out = Vec::with_capacity(active.len());
            for entry in active {
                let (task_name, task_color) = match s.get_task(entry.task_id)? {
                    Some(t) => (t.name, t.color),
                    None => (String::new(), String::new()),
                };
                out.push(RunningEntry {
                    elapsed: entry.effective_seconds(now),
                    entry,
                    task_name,
                    task_color,
                });
            }
            Ok(out)
        })
        .await?;
    Ok(Json(running))
}

pub async fn update_entry(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<UpdateEntryRequest>,
) -> ApiResult<impl IntoResponse> {
    let entry = state
        .store
        .call(move |s| {
            let current = s
                .get_time_entry(id)?
                .ok_or_else(|| Error::not_found("Time entry", id))?;
            if current.is_active() && (req.start_time.is_some() || req.end_time.is_some()) {
                return Err(Error::conflict(format!(
                    "Time entry {} is still active; stop it before editing times",
                    id
                )));
            }
            let start = req.start_time.unwrap_or(current.start_time);
            let end = req.end_time.or(current.end_time);
            let mut update = TimeEntryUpdate {
                notes: req.notes.map(Some),
                ..Default::default()
            };
            if req.start_time.is_some() || req.end_time.is_some() {
                let end = end.ok_or_else(|| Error::validation("endTime", "is required"))?;
                if end < start {
                    return Err(Error::validation("endTime", "must not be before startTime"));
                }
                update.start_time = Some(start);
                update.end_time = Some(Some(end));
                update.duration = Some(Some((end - start).num_seconds()));
            }
            s.update_time_entry(id, update)
        })
        .await?;
    Ok(Json(entry))
}

pub async fn delete_entry(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state
        .store
        .call(move |s| {
            let entry = s
                .get_time_entry(id)?
                .ok_or_else(|| Error::not_found("Time entry", id))?;
            if entry.is_active() {
                return Err(Error::conflict(format!(
                    "Time entry {} is still active; stop it first",
                    id
                )));
            }
            s.delete_time_entry(id)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_delete(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<BulkDeleteRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.ids.is_empty() {
        return Err(invalid("ids", "must not be empty"));
    }
    let deleted = state
        .store
        .call(move |s| s.delete_time_entries(&req.ids))
        .await?;
    tracing::info!(deleted, "Time entries deleted");
    Ok(Json(serde_json::json!({"deleted": deleted})))
}
