//! Storage layer for Pontual data.
//!
//! Every backend implements the [`Store`] trait so the timer lifecycle, the
//! REST handlers and the WhatsApp dispatcher never know which one is in use:
//!
//! - **SQLite** (`SqliteStore`, default): relational schema with foreign keys
//!   and a partial unique index guarding the one-running-entry-per-task rule
//! - **JSON file** (`JsonFileStore`): the whole dataset as a single JSON
//!   document, rewritten atomically after each mutation
//! - **Memory** (`MemoryStore`): the same dataset without persistence, used
//!   by tests and throwaway instances
//!
//! The read-side aggregations (dashboard, reports) are default methods built
//! on the CRUD surface, so all backends share one implementation.

pub mod analytics;
pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};
use crate::models::*;

/// Uniform CRUD surface over tasks, task items, time entries, users and the
/// WhatsApp integration.
pub trait Store: Send {
    // ── Tasks ─────────────────────────────────────────────────────────
    fn list_tasks(&mut self) -> Result<Vec<Task>>;
    fn get_task(&mut self, id: i64) -> Result<Option<Task>>;
    fn create_task(&mut self, task: NewTask) -> Result<Task>;
    fn update_task(&mut self, id: i64, update: TaskUpdate) -> Result<Task>;
    /// Fails with a conflict while any time entry references the task.
    /// Returns `false` when the task does not exist.
    fn delete_task(&mut self, id: i64) -> Result<bool>;
    /// Marks the task completed at `at`, or reopens it when `at` is `None`.
    fn set_task_completion(&mut self, id: i64, at: Option<DateTime<Utc>>) -> Result<Task>;

    // ── Task items ────────────────────────────────────────────────────
    fn list_task_items(&mut self, task_id: i64) -> Result<Vec<TaskItem>>;
    fn get_task_item(&mut self, id: i64) -> Result<Option<TaskItem>>;
    fn create_task_item(&mut self, task_id: i64, title: &str) -> Result<TaskItem>;
    fn update_task_item(&mut self, id: i64, update: TaskItemUpdate) -> Result<TaskItem>;
    fn delete_task_item(&mut self, id: i64) -> Result<bool>;
    /// Returns how many items changed.
    fn complete_all_task_items(&mut self, task_id: i64) -> Result<usize>;

    // ── Time entries ──────────────────────────────────────────────────
    fn list_time_entries(&mut self, filter: &EntryFilter) -> Result<Vec<TimeEntry>>;
    fn get_time_entry(&mut self, id: i64) -> Result<Option<TimeEntry>>;
    /// Fails with a conflict when `entry` would be a second running entry
    /// for its task.
    fn create_time_entry(&mut self, entry: NewTimeEntry) -> Result<TimeEntry>;
    fn update_time_entry(&mut self, id: i64, update: TimeEntryUpdate) -> Result<TimeEntry>;
    fn delete_time_entry(&mut self, id: i64) -> Result<bool>;
    /// Returns how many of `ids` existed and were removed.
    fn delete_time_entries(&mut self, ids: &[i64]) -> Result<usize>;
    /// Entries that are running or paused, newest first.
    fn active_time_entries(&mut self) -> Result<Vec<TimeEntry>>;

    // ── Users ─────────────────────────────────────────────────────────
    fn list_users(&mut self) -> Result<Vec<User>>;
    fn get_user(&mut self, id: i64) -> Result<Option<User>>;
    fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>>;
    fn find_user_by_api_key(&mut self, api_key: &str) -> Result<Option<User>>;
    fn find_user_by_reset_token(&mut self, token: &str) -> Result<Option<User>>;
    fn create_user(&mut self, user: NewUser) -> Result<User>;
    fn update_user(&mut self, id: i64, update: UserUpdate) -> Result<User>;
    fn delete_user(&mut self, id: i64) -> Result<bool>;

    // ── WhatsApp ──────────────────────────────────────────────────────
    fn get_whatsapp_integration(&mut self) -> Result<Option<WhatsAppIntegration>>;
    /// Creates the single integration row or replaces it in place.
    fn save_whatsapp_integration(
        &mut self,
        input: WhatsAppIntegrationInput,
    ) -> Result<WhatsAppIntegration>;
    fn append_whatsapp_log(&mut self, log: NewWhatsAppLog) -> Result<WhatsAppLog>;
    /// Newest first.
    fn list_whatsapp_logs(&mut self, limit: usize) -> Result<Vec<WhatsAppLog>>;

    // ── Derived views ─────────────────────────────────────────────────

    fn running_entries_for_task(&mut self, task_id: i64) -> Result<Vec<TimeEntry>> {
        Ok(self
            .active_time_entries()?
            .into_iter()
            .filter(|e| e.task_id == task_id && e.is_running)
            .collect())
    }

    fn count_users(&mut self) -> Result<usize> {
        Ok(self.list_users()?.len())
    }

    fn task_with_stats(&mut self, id: i64, now: DateTime<Utc>) -> Result<Option<TaskWithStats>> {
        let Some(task) = self.get_task(id)? else {
            return Ok(None);
        };
        let entries = self.list_time_entries(&EntryFilter {
            task_id: Some(id),
            ..Default::default()
        })?;
        let items = self.list_task_items(id)?;
        Ok(Some(analytics::task_with_stats(task, &entries, &items, now)))
    }

    fn tasks_with_stats(&mut self, now: DateTime<Utc>) -> Result<Vec<TaskWithStats>> {
        let tasks = self.list_tasks()?;
        let entries = self.list_time_entries(&EntryFilter::default())?;
        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            let items = self.list_task_items(task.id)?;
            let own: Vec<TimeEntry> = entries
                .iter()
                .filter(|e| e.task_id == task.id)
                .cloned()
                .collect();
            out.push(analytics::task_with_stats(task, &own, &items, now));
        }
        Ok(out)
    }

    fn dashboard_stats(&mut self, now: DateTime<Utc>) -> Result<DashboardStats> {
        let tasks = self.list_tasks()?;
        let entries = self.list_time_entries(&EntryFilter::default())?;
        Ok(analytics::dashboard_stats(&tasks, &entries, now))
    }

    fn time_by_task(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimeByTask>> {
        let tasks = self.list_tasks()?;
        let entries = self.list_time_entries(&EntryFilter {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        })?;
        Ok(analytics::time_by_task(&tasks, &entries, now))
    }

    fn daily_totals(&mut self, days: u32, now: DateTime<Utc>) -> Result<Vec<DailyTotal>> {
        let entries = self.list_time_entries(&EntryFilter::default())?;
        Ok(analytics::daily_totals(&entries, days, now))
    }
}

/// Available storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    File,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sql" | "relational" => Ok(Self::Sqlite),
            "file" | "json" => Ok(Self::File),
            "memory" | "mem" => Ok(Self::Memory),
            _ => Err(format!(
                "Invalid storage backend '{}'. Valid values: sqlite, file, memory",
                s
            )),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open the configured backend.
pub fn open(kind: BackendKind, path: &Path) -> anyhow::Result<Box<dyn Store>> {
    if kind != BackendKind::Memory {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create storage directory")?;
        }
    }
    let store: Box<dyn Store> = match kind {
        BackendKind::Sqlite => Box::new(SqliteStore::open(path)?),
        BackendKind::File => Box::new(JsonFileStore::open(path)?),
        BackendKind::Memory => Box::new(MemoryStore::new()),
    };
    Ok(store)
}

/// Async-safe handle to the active store.
///
/// Every `call` runs on tokio's blocking pool while holding the store mutex,
/// so a closure is a single critical section: read-then-write checks inside
/// one closure cannot interleave with another request.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<Box<dyn Store>>>,
}

impl StoreHandle {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    /// Run a closure with exclusive access to the store on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Store) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            // A closure that panicked left the data as it was at the panic;
            // keep serving rather than failing every later request.
            let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
            f(guard.as_mut())
        })
        .await
        .map_err(|e| Error::Other(anyhow::anyhow!("Store task panicked: {}", e)))?
    }
}

pub(crate) fn require_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name", "must not be empty"));
    }
    Ok(name.to_string())
}
