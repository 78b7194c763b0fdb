use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Store, require_name};
use crate::errors::{Error, Result};
use crate::models::*;

/// Next identifier per table. Identifiers are never reused, even after
/// deletes, matching SQLite's AUTOINCREMENT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sequences {
    task: i64,
    task_item: i64,
    time_entry: i64,
    user: i64,
    whatsapp_log: i64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            task: 1,
            task_item: 1,
            time_entry: 1,
            user: 1,
            whatsapp_log: 1,
        }
    }
}

fn next(seq: &mut i64) -> i64 {
    let id = *seq;
    *seq += 1;
    id
}

/// In-process dataset. Also the document format of [`super::JsonFileStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStore {
    #[serde(default)]
    sequences: Sequences,
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    task_items: Vec<TaskItem>,
    #[serde(default)]
    time_entries: Vec<TimeEntry>,
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    whatsapp_integration: Option<WhatsAppIntegration>,
    #[serde(default)]
    whatsapp_logs: Vec<WhatsAppLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn task_mut(&mut self, id: i64) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found("Task", id))
    }

    fn ensure_task(&self, id: i64) -> Result<()> {
        if self.tasks.iter().any(|t| t.id == id) {
            Ok(())
        } else {
            Err(Error::not_found("Task", id))
        }
    }

    fn ensure_no_other_running(&self, task_id: i64, except: Option<i64>) -> Result<()> {
        let clash = self
            .time_entries
            .iter()
            .any(|e| e.task_id == task_id && e.is_running && Some(e.id) != except);
        if clash {
            return Err(Error::conflict(format!(
                "Timer already active for task {}",
                task_id
            )));
        }
        Ok(())
    }

    fn username_taken(&self, username: &str, except: Option<i64>) -> bool {
        self.users
            .iter()
            .any(|u| u.username.eq_ignore_ascii_case(username) && Some(u.id) != except)
    }
}

/// Newest first, ties broken by id so ordering is total.
fn sort_entries(entries: &mut [TimeEntry]) {
    entries.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
}

impl Store for MemoryStore {
    fn list_tasks(&mut self) -> Result<Vec<Task>> {
        Ok(self.tasks.clone())
    }

    fn get_task(&mut self, id: i64) -> Result<Option<Task>> {
        Ok(self.tasks.iter().find(|t| t.id == id).cloned())
    }

    fn create_task(&mut self, task: NewTask) -> Result<Task> {
        let name = require_name(&task.name)?;
        let task = Task {
            id: next(&mut self.sequences.task),
            name,
            description: task.description,
            color: task.color.unwrap_or_else(|| DEFAULT_TASK_COLOR.to_string()),
            estimated_hours: task.estimated_hours,
            deadline: task.deadline,
            is_active: true,
            is_completed: false,
            completed_at: None,
            user_id: task.user_id,
            created_at: Utc::now(),
        };
        self.tasks.push(task.clone());
        Ok(task)
    }

    fn update_task(&mut self, id: i64, update: TaskUpdate) -> Result<Task> {
        let name = update.name.as_deref().map(require_name).transpose()?;
        let task = self.task_mut(id)?;
        if let Some(name) = name {
            task.name = name;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        if let Some(color) = update.color {
            task.color = color;
        }
        if let Some(estimated_hours) = update.estimated_hours {
            task.estimated_hours = estimated_hours;
        }
        if let Some(deadline) = update.deadline {
            task.deadline = deadline;
        }
        if let Some(is_active) = update.is_active {
            task.is_active = is_active;
        }
        Ok(task.clone())
    }

    fn delete_task(&mut self, id: i64) -> Result<bool> {
        if !self.tasks.iter().any(|t| t.id == id) {
            return Ok(false);
        }
        let entry_count = self.time_entries.iter().filter(|e| e.task_id == id).count();
        if entry_count > 0 {
            return Err(Error::conflict(format!(
                "Task {} has {} time entries and cannot be deleted",
                id, entry_count
            )));
        }
        self.task_items.retain(|i| i.task_id != id);
        self.tasks.retain(|t| t.id != id);
        Ok(true)
    }

    fn set_task_completion(&mut self, id: i64, at: Option<DateTime<Utc>>) -> Result<Task> {
        let task = self.task_mut(id)?;
        task.is_completed = at.is_some();
        task.completed_at = at;
        Ok(task.clone())
    }

    fn list_task_items(&mut self, task_id: i64) -> Result<Vec<TaskItem>> {
        Ok(self
            .task_items
            .iter()
            .filter(|i| i.task_id == task_id)
            .cloned()
            .collect())
    }

    fn get_task_item(&mut self, id: i64) -> Result<Option<TaskItem>> {
        Ok(self.task_items.iter().find(|i| i.id == id).cloned())
    }

    fn create_task_item(&mut self, task_id: i64, title: &str) -> Result<TaskItem> {
        self.ensure_task(task_id)?;
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("title", "must not be empty"));
        }
        let item = TaskItem {
            id: next(&mut self.sequences.task_item),
            task_id,
            title: title.to_string(),
            completed: false,
            created_at: Utc::now(),
        };
        self.task_items.push(item.clone());
        Ok(item)
    }

    fn update_task_item(&mut self, id: i64, update: TaskItemUpdate) -> Result<TaskItem> {
        let title = match update.title.as_deref().map(str::trim) {
            Some("") => return Err(Error::validation("title", "must not be empty")),
            other => other.map(str::to_string),
        };
        let item = self
            .task_items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| Error::not_found("Task item", id))?;
        if let Some(title) = title {
            item.title = title;
        }
        if let Some(completed) = update.completed {
            item.completed = completed;
        }
        Ok(item.clone())
    }

    fn delete_task_item(&mut self, id: i64) -> Result<bool> {
        let before = self.task_items.len();
        self.task_items.retain(|i| i.id != id);
        Ok(self.task_items.len() < before)
    }

    fn complete_all_task_items(&mut self, task_id: i64) -> Result<usize> {
        self.ensure_task(task_id)?;
        let mut changed = 0;
        for item in self
            .task_items
            .iter_mut()
            .filter(|i| i.task_id == task_id && !i.completed)
        {
            item.completed = true;
            changed += 1;
        }
        Ok(changed)
    }

    fn list_time_entries(&mut self, filter: &EntryFilter) -> Result<Vec<TimeEntry>> {
        let mut entries: Vec<TimeEntry> = self
            .time_entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        sort_entries(&mut entries);
        Ok(entries)
    }

    fn get_time_entry(&mut self, id: i64) -> Result<Option<TimeEntry>> {
        Ok(self.time_entries.iter().find(|e| e.id == id).cloned())
    }

    fn create_time_entry(&mut self, entry: NewTimeEntry) -> Result<TimeEntry> {
        self.ensure_task(entry.task_id)?;
        let is_running = entry.state == EntryState::Running;
        if is_running {
            self.ensure_no_other_running(entry.task_id, None)?;
        }
        let entry = TimeEntry {
            id: next(&mut self.sequences.time_entry),
            task_id: entry.task_id,
            start_time: entry.start_time,
            end_time: entry.end_time,
            duration: entry.duration,
            is_running,
            state: entry.state,
            notes: entry.notes,
            user_id: entry.user_id,
            created_at: Utc::now(),
        };
        self.time_entries.push(entry.clone());
        Ok(entry)
    }

    fn update_time_entry(&mut self, id: i64, update: TimeEntryUpdate) -> Result<TimeEntry> {
        let task_id = self
            .time_entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.task_id)
            .ok_or_else(|| Error::not_found("Time entry", id))?;
        if update.state == Some(EntryState::Running) {
            self.ensure_no_other_running(task_id, Some(id))?;
        }
        let entry = self
            .time_entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::not_found("Time entry", id))?;
        if let Some(start_time) = update.start_time {
            entry.start_time = start_time;
        }
        if let Some(end_time) = update.end_time {
            entry.end_time = end_time;
        }
        if let Some(duration) = update.duration {
            entry.duration = duration;
        }
        if let Some(state) = update.state {
            entry.state = state;
            entry.is_running = state == EntryState::Running;
        }
        if let Some(notes) = update.notes {
            entry.notes = notes;
        }
        Ok(entry.clone())
    }

    fn delete_time_entry(&mut self, id: i64) -> Result<bool> {
        let before = self.time_entries.len();
        self.time_entries.retain(|e| e.id != id);
        Ok(self.time_entries.len() < before)
    }

    fn delete_time_entries(&mut self, ids: &[i64]) -> Result<usize> {
        let before = self.time_entries.len();
        self.time_entries.retain(|e| !ids.contains(&e.id));
        Ok(before - self.time_entries.len())
    }

    fn active_time_entries(&mut self) -> Result<Vec<TimeEntry>> {
        let mut entries: Vec<TimeEntry> = self
            .time_entries
            .iter()
            .filter(|e| e.is_active())
            .cloned()
            .collect();
        sort_entries(&mut entries);
        Ok(entries)
    }

    fn list_users(&mut self) -> Result<Vec<User>> {
        Ok(self.users.clone())
    }

    fn get_user(&mut self, id: i64) -> Result<Option<User>> {
        Ok(self.users.iter().find(|u| u.id == id).cloned())
    }

    fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    fn find_user_by_api_key(&mut self, api_key: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.api_key.as_deref() == Some(api_key))
            .cloned())
    }

    fn find_user_by_reset_token(&mut self, token: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.reset_token.as_deref() == Some(token))
            .cloned())
    }

    fn create_user(&mut self, user: NewUser) -> Result<User> {
        let username = user.username.trim().to_string();
        if username.is_empty() {
            return Err(Error::validation("username", "must not be empty"));
        }
        if self.username_taken(&username, None) {
            return Err(Error::conflict(format!("Username '{}' already exists", username)));
        }
        let user = User {
            id: next(&mut self.sequences.user),
            username,
            password_hash: user.password_hash,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            is_active: true,
            api_key: user.api_key,
            must_reset_password: user.must_reset_password,
            reset_token: None,
            reset_token_expires_at: None,
            last_login: None,
            created_at: Utc::now(),
        };
        self.users.push(user.clone());
        Ok(user)
    }

    fn update_user(&mut self, id: i64, update: UserUpdate) -> Result<User> {
        let user = self
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| Error::not_found("User", id))?;
        if let Some(hash) = update.password_hash {
            user.password_hash = hash;
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(full_name) = update.full_name {
            user.full_name = full_name;
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(is_active) = update.is_active {
            user.is_active = is_active;
        }
        if let Some(api_key) = update.api_key {
            user.api_key = api_key;
        }
        if let Some(must_reset) = update.must_reset_password {
            user.must_reset_password = must_reset;
        }
        if let Some(reset) = update.reset_token {
            let (token, expires) = reset.unzip();
            user.reset_token = token;
            user.reset_token_expires_at = expires;
        }
        if let Some(last_login) = update.last_login {
            user.last_login = Some(last_login);
        }
        Ok(user.clone())
    }

    fn delete_user(&mut self, id: i64) -> Result<bool> {
        let before = self.users.len();
        self.users.retain(|u| u.id != id);
        if self.users.len() == before {
            return Ok(false);
        }
        for task in self.tasks.iter_mut().filter(|t| t.user_id == Some(id)) {
            task.user_id = None;
        }
        for entry in self.time_entries.iter_mut().filter(|e| e.user_id == Some(id)) {
            entry.user_id = None;
        }
        Ok(true)
    }

    fn get_whatsapp_integration(&mut self) -> Result<Option<WhatsAppIntegration>> {
        Ok(self.whatsapp_integration.clone())
    }

    fn save_whatsapp_integration(
        &mut self,
        input: WhatsAppIntegrationInput,
    ) -> Result<WhatsAppIntegration> {
        let integration = WhatsAppIntegration {
            api_url: input.api_url,
            api_key: input.api_key,
            instance_name: input.instance_name,
            phone_number: input.phone_number,
            authorized_numbers: input.authorized_numbers,
            restrict_to_group: input.restrict_to_group,
            allowed_group_jid: input.allowed_group_jid,
            webhook_url: input.webhook_url,
            is_active: input.is_active,
            updated_at: Utc::now(),
        };
        self.whatsapp_integration = Some(integration.clone());
        Ok(integration)
    }

    fn append_whatsapp_log(&mut self, log: NewWhatsAppLog) -> Result<WhatsAppLog> {
        let log = WhatsAppLog {
            id: next(&mut self.sequences.whatsapp_log),
            phone_number: log.phone_number,
            message: log.message,
            command: log.command,
            response: log.response,
            success: log.success,
            error_message: log.error_message,
            created_at: Utc::now(),
        };
        self.whatsapp_logs.push(log.clone());
        Ok(log)
    }

    fn list_whatsapp_logs(&mut self, limit: usize) -> Result<Vec<WhatsAppLog>> {
        Ok(self.whatsapp_logs.iter().rev().take(limit).cloned().collect())
    }
}
