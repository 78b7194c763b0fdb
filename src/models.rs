use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TASK_COLOR: &str = "#3B82F6";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub estimated_hours: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn estimated_seconds(&self) -> Option<i64> {
        self.estimated_hours
            .filter(|h| *h > 0.0)
            .map(|h| (h * 3600.0).round() as i64)
    }

    pub fn is_open(&self) -> bool {
        self.is_active && !self.is_completed
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub estimated_hours: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// Partial update. `Some(None)` on a nullable field clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub color: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub estimated_hours: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub deadline: Option<Option<DateTime<Utc>>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub id: i64,
    pub task_id: i64,
    pub title: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItemUpdate {
    pub title: Option<String>,
    pub completed: Option<bool>,
}

/// Lifecycle state of a time entry. Persisted explicitly so that "finished"
/// never has to be inferred from timestamps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Running,
    Paused,
    Finished,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Finished => "finished",
        }
    }
}

impl FromStr for EntryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "finished" => Ok(Self::Finished),
            _ => Err(format!("Invalid entry state: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: i64,
    pub task_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Accumulated seconds of all closed sessions.
    pub duration: Option<i64>,
    pub is_running: bool,
    pub state: EntryState,
    pub notes: Option<String>,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TimeEntry {
    /// Tracked seconds as of `now`, including the open session when running.
    pub fn effective_seconds(&self, now: DateTime<Utc>) -> i64 {
        let closed = self.duration.unwrap_or(0);
        if self.is_running {
            closed + (now - self.start_time).num_seconds().max(0)
        } else {
            closed
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != EntryState::Finished
    }
}

#[derive(Debug, Clone)]
pub struct NewTimeEntry {
    pub task_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub state: EntryState,
    pub notes: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct TimeEntryUpdate {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<Option<DateTime<Utc>>>,
    pub duration: Option<Option<i64>>,
    pub state: Option<EntryState>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub task_id: Option<i64>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &TimeEntry) -> bool {
        self.task_id.is_none_or(|id| entry.task_id == id)
            && self.from.is_none_or(|from| entry.start_time >= from)
            && self.to.is_none_or(|to| entry.start_time < to)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub api_key: Option<String>,
    pub must_reset_password: bool,
    pub reset_token: Option<String>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// What the API exposes about a user. Password hash and reset token stay in
/// the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub api_key: Option<String>,
    pub must_reset_password: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            is_active: user.is_active,
            api_key: user.api_key.clone(),
            must_reset_password: user.must_reset_password,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Role,
    pub api_key: Option<String>,
    pub must_reset_password: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub password_hash: Option<String>,
    pub email: Option<Option<String>>,
    pub full_name: Option<Option<String>>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub api_key: Option<Option<String>>,
    pub must_reset_password: Option<bool>,
    pub reset_token: Option<Option<(String, DateTime<Utc>)>>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppIntegration {
    pub api_url: String,
    pub api_key: String,
    pub instance_name: String,
    pub phone_number: Option<String>,
    pub authorized_numbers: Vec<String>,
    pub restrict_to_group: bool,
    pub allowed_group_jid: Option<String>,
    pub webhook_url: Option<String>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppIntegrationInput {
    pub api_url: String,
    pub api_key: String,
    pub instance_name: String,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub authorized_numbers: Vec<String>,
    #[serde(default)]
    pub restrict_to_group: bool,
    pub allowed_group_jid: Option<String>,
    pub webhook_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppLog {
    pub id: i64,
    pub phone_number: String,
    pub message: String,
    pub command: Option<String>,
    pub response: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWhatsAppLog {
    pub phone_number: String,
    pub message: String,
    pub command: Option<String>,
    pub response: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

// API view types

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWithStats {
    #[serde(flatten)]
    pub task: Task,
    /// Tracked seconds across all entries, including any running session.
    pub total_time: i64,
    pub is_running: bool,
    pub items_total: usize,
    pub items_completed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub today_time: i64,
    pub week_time: i64,
    pub month_time: i64,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub overdue_tasks: usize,
    pub over_budget_tasks: usize,
    pub due_today: usize,
    pub due_tomorrow: usize,
    pub nearing_limit_tasks: usize,
    pub running_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeByTask {
    pub task_id: i64,
    pub task_name: String,
    pub color: String,
    pub total_time: i64,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyTotal {
    pub date: chrono::NaiveDate,
    pub total_time: i64,
}

/// Distinguishes an absent JSON field (`None`) from an explicit `null`
/// (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
