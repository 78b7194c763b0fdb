//! Time-entry lifecycle: start, pause, resume, stop, finish.
//!
//! ```text
//! idle ──start──▶ running ──pause──▶ paused
//!                    ▲                  │
//!                    └─────resume───────┘
//! running | paused ──stop / finish──▶ finished (or deleted under 60 s)
//! ```
//!
//! Every operation takes the store and the current instant explicitly. Callers
//! run one operation per [`crate::store::StoreHandle::call`], which makes each
//! transition a single critical section.

use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::Serialize;
use tracing::info;

use crate::errors::{Error, Result};
use crate::models::{EntryState, NewTimeEntry, Task, TimeEntry, TimeEntryUpdate};
use crate::store::Store;

/// Sessions shorter than this are noise and are deleted on stop.
pub const MIN_ENTRY_SECONDS: i64 = 60;

/// Longest session [`log_time`] accepts in one go: one week.
pub const MAX_LOGGED_SECONDS: i64 = 7 * 24 * 3600;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Result of stopping or finishing an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum StopOutcome {
    Saved { entry: TimeEntry },
    /// The entry was shorter than [`MIN_ENTRY_SECONDS`] and was deleted.
    #[serde(rename_all = "camelCase")]
    Discarded {
        entry_id: i64,
        task_id: i64,
        duration: i64,
    },
}

impl StopOutcome {
    pub fn duration(&self) -> i64 {
        match self {
            Self::Saved { entry } => entry.duration.unwrap_or(0),
            Self::Discarded { duration, .. } => *duration,
        }
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded { .. })
    }
}

fn require_task(store: &mut dyn Store, task_id: i64) -> Result<Task> {
    store
        .get_task(task_id)?
        .ok_or_else(|| Error::not_found("Task", task_id))
}

fn require_entry(store: &mut dyn Store, entry_id: i64) -> Result<TimeEntry> {
    store
        .get_time_entry(entry_id)?
        .ok_or_else(|| Error::not_found("Time entry", entry_id))
}

pub fn start(
    store: &mut dyn Store,
    task_id: i64,
    notes: Option<String>,
    user_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<TimeEntry> {
    require_task(store, task_id)?;
    if !store.running_entries_for_task(task_id)?.is_empty() {
        return Err(Error::conflict(format!(
            "Timer already active for task {}",
            task_id
        )));
    }
    let entry = store.create_time_entry(NewTimeEntry {
        task_id,
        start_time: now,
        end_time: None,
        duration: None,
        state: EntryState::Running,
        notes,
        user_id,
    })?;
    info!(entry_id = entry.id, task_id, "Timer started");
    Ok(entry)
}

pub fn pause(store: &mut dyn Store, entry_id: i64, now: DateTime<Utc>) -> Result<TimeEntry> {
    let entry = require_entry(store, entry_id)?;
    if entry.state != EntryState::Running {
        return Err(Error::conflict(format!(
            "Time entry {} is not running",
            entry_id
        )));
    }
    let total = entry.effective_seconds(now);
    let paused = store.update_time_entry(
        entry_id,
        TimeEntryUpdate {
            end_time: Some(Some(now)),
            duration: Some(Some(total)),
            state: Some(EntryState::Paused),
            ..Default::default()
        },
    )?;
    info!(entry_id, duration = total, "Timer paused");
    Ok(paused)
}

pub fn resume(store: &mut dyn Store, entry_id: i64, now: DateTime<Utc>) -> Result<TimeEntry> {
    let entry = require_entry(store, entry_id)?;
    if entry.state != EntryState::Paused {
        return Err(Error::conflict(format!(
            "Time entry {} is not paused",
            entry_id
        )));
    }
    if !store.running_entries_for_task(entry.task_id)?.is_empty() {
        return Err(Error::conflict(format!(
            "Timer already active for task {}",
            entry.task_id
        )));
    }
    let resumed = store.update_time_entry(
        entry_id,
        TimeEntryUpdate {
            start_time: Some(now),
            end_time: Some(None),
            state: Some(EntryState::Running),
            ..Default::default()
        },
    )?;
    info!(entry_id, "Timer resumed");
    Ok(resumed)
}

/// Close an active entry, deleting it when it is shorter than a minute.
pub fn stop(store: &mut dyn Store, entry_id: i64, now: DateTime<Utc>) -> Result<StopOutcome> {
    let entry = require_entry(store, entry_id)?;
    if !entry.is_active() {
        return Err(Error::conflict(format!(
            "Time entry {} is already finished",
            entry_id
        )));
    }
    let total = entry.effective_seconds(now);
    if total < MIN_ENTRY_SECONDS {
        store.delete_time_entry(entry_id)?;
        info!(entry_id, duration = total, "Timer discarded: under one minute");
        return Ok(StopOutcome::Discarded {
            entry_id,
            task_id: entry.task_id,
            duration: total,
        });
    }
    let entry = close(store, &entry, total, now)?;
    info!(entry_id, duration = total, "Timer stopped");
    Ok(StopOutcome::Saved { entry })
}

/// Same duration rule as [`stop`]. A finished entry leaves every active view.
pub fn finish(store: &mut dyn Store, entry_id: i64, now: DateTime<Utc>) -> Result<StopOutcome> {
    stop(store, entry_id, now)
}

/// Finish the entry and complete its task. Short sessions are kept with the
/// duration raised to [`MIN_ENTRY_SECONDS`].
pub fn finish_and_complete(
    store: &mut dyn Store,
    entry_id: i64,
    task_id: i64,
    now: DateTime<Utc>,
) -> Result<(TimeEntry, Task)> {
    let entry = require_entry(store, entry_id)?;
    if entry.task_id != task_id {
        return Err(Error::validation(
            "taskId",
            format!("time entry {} does not belong to task {}", entry_id, task_id),
        ));
    }
    require_task(store, task_id)?;
    let total = entry.effective_seconds(now).max(MIN_ENTRY_SECONDS);
    let end = if entry.is_active() {
        now
    } else {
        entry.end_time.unwrap_or(now)
    };
    let entry = close(store, &entry, total, end)?;
    let task = store.set_task_completion(task_id, Some(now))?;
    info!(entry_id, task_id, duration = total, "Timer finished and task completed");
    Ok((entry, task))
}

/// Record an already finished session of `seconds` ending at `now`.
pub fn log_time(
    store: &mut dyn Store,
    task_id: i64,
    seconds: i64,
    notes: Option<String>,
    user_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<TimeEntry> {
    if seconds <= 0 {
        return Err(Error::validation("duration", "must be greater than zero"));
    }
    if seconds > MAX_LOGGED_SECONDS {
        return Err(Error::validation(
            "duration",
            format!("must be at most {} seconds", MAX_LOGGED_SECONDS),
        ));
    }
    let start_time = TimeDelta::try_seconds(seconds)
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or_else(|| Error::validation("duration", "out of range"))?;
    require_task(store, task_id)?;
    let entry = store.create_time_entry(NewTimeEntry {
        task_id,
        start_time,
        end_time: Some(now),
        duration: Some(seconds),
        state: EntryState::Finished,
        notes,
        user_id,
    })?;
    info!(entry_id = entry.id, task_id, duration = seconds, "Time logged");
    Ok(entry)
}

fn close(
    store: &mut dyn Store,
    entry: &TimeEntry,
    total: i64,
    end: DateTime<Utc>,
) -> Result<TimeEntry> {
    store.update_time_entry(
        entry.id,
        TimeEntryUpdate {
            end_time: Some(Some(end)),
            duration: Some(Some(total)),
            state: Some(EntryState::Finished),
            ..Default::default()
        },
    )
}
