use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiResult, JsonBody, SharedState};
use crate::auth::AuthUser;
use crate::timer::{self, StopOutcome};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub task_id: i64,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    pub entry_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishAndCompleteRequest {
    pub entry_id: i64,
    pub task_id: i64,
}

fn stop_body(outcome: &StopOutcome) -> Value {
    match outcome {
        StopOutcome::Saved { entry } => json!({
            "discarded": false,
            "duration": outcome.duration(),
            "entry": entry,
        }),
        StopOutcome::Discarded { entry_id, .. } => json!({
            "discarded": true,
            "duration": outcome.duration(),
            "entry": null,
            "entryId": entry_id,
        }),
    }
}

pub async fn start_timer(
    State(state): State<SharedState>,
    user: Option<Extension<AuthUser>>,
    JsonBody(req): JsonBody<StartRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let user_id = user.map(|Extension(u)| u.id);
    let entry = state
        .store
        .call(move |s| timer::start(s, req.task_id, req.notes, user_id, now))
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn pause_timer(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<EntryRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let entry = state
        .store
        .call(move |s| timer::pause(s, req.entry_id, now))
        .await?;
    Ok(Json(entry))
}

pub async fn resume_timer(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<EntryRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let entry = state
        .store
        .call(move |s| timer::resume(s, req.entry_id, now))
        .await?;
    Ok(Json(entry))
}

pub async fn stop_timer(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<EntryRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let outcome = state
        .store
        .call(move |s| timer::stop(s, req.entry_id, now))
        .await?;
    Ok(Json(stop_body(&outcome)))
}

pub async fn finish_timer(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<EntryRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let outcome = state
        .store
        .call(move |s| timer::finish(s, req.entry_id, now))
        .await?;
    Ok(Json(stop_body(&outcome)))
}

pub async fn finish_and_complete(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<FinishAndCompleteRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let (entry, task) = state
        .store
        .call(move |s| timer::finish_and_complete(s, req.entry_id, req.task_id, now))
        .await?;
    Ok(Json(json!({"entry": entry, "task": task})))
}
