use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use super::{ApiError, ApiResult, SharedState, parse_instant};

pub const DEFAULT_DAYS: u32 = 7;
pub const MAX_DAYS: u32 = 366;

#[derive(Deserialize, Default)]
pub struct RangeQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct DailyQuery {
    pub days: Option<u32>,
}

/// `[first of this month, first of next month)` in UTC.
fn current_month(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .unwrap_or(now.date_naive())
        .and_time(NaiveTime::MIN)
        .and_utc();
    let next = first.checked_add_months(Months::new(1)).unwrap_or(now);
    (first, next)
}

pub async fn dashboard_stats(State(state): State<SharedState>) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let stats = state.store.call(move |s| s.dashboard_stats(now)).await?;
    Ok(Json(stats))
}

pub async fn time_by_task(
    State(state): State<SharedState>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<impl IntoResponse> {
    let now = state.now();
    let (month_start, month_end) = current_month(now);
    let from = match query.from.as_deref() {
        Some(v) => parse_instant("from", v)?,
        None => month_start,
    };
    let to = match query.to.as_deref() {
        Some(v) => parse_instant("to", v)?,
        None => month_end,
    };
    if to <= from {
        return Err(ApiError::Validation {
            field: "to".into(),
            message: "must be after from".into(),
        });
    }
    let rows = state
        .store
        .call(move |s| s.time_by_task(from, to, now))
        .await?;
    Ok(Json(rows))
}

pub async fn daily_totals(
    State(state): State<SharedState>,
    Query(query): Query<DailyQuery>,
) -> ApiResult<impl IntoResponse> {
    let days = query.days.unwrap_or(DEFAULT_DAYS);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(ApiError::Validation {
            field: "days".into(),
            message: format!("must be between 1 and {}", MAX_DAYS),
        });
    }
    let now = state.now();
    let totals = state
        .store
        .call(move |s| s.daily_totals(days, now))
        .await?;
    Ok(Json(totals))
}
