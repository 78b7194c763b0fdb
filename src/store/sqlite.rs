use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use super::{Store, require_name};
use crate::errors::{Error, Result};
use crate::models::*;

const TASK_COLUMNS: &str = "id, name, description, color, estimated_hours, deadline, is_active, is_completed, completed_at, user_id, created_at";
const ITEM_COLUMNS: &str = "id, task_id, title, completed, created_at";
const ENTRY_COLUMNS: &str =
    "id, task_id, start_time, end_time, duration, is_running, state, notes, user_id, created_at";
const USER_COLUMNS: &str = "id, username, password_hash, email, full_name, role, is_active, api_key, must_reset_password, reset_token, reset_token_expires_at, last_login, created_at";
const INTEGRATION_COLUMNS: &str = "api_url, api_key, instance_name, phone_number, authorized_numbers, restrict_to_group, allowed_group_jid, webhook_url, is_active, updated_at";
const LOG_COLUMNS: &str =
    "id, phone_number, message, command, response, success, error_message, created_at";

/// Fixed-width UTC timestamps so lexical order in SQL equals time order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.9f+00:00").to_string()
}

fn ts_opt(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

/// Relational backend over SQLite.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    email TEXT,
                    full_name TEXT,
                    role TEXT NOT NULL DEFAULT 'user',
                    is_active INTEGER NOT NULL DEFAULT 1,
                    api_key TEXT UNIQUE,
                    must_reset_password INTEGER NOT NULL DEFAULT 0,
                    reset_token TEXT,
                    reset_token_expires_at TEXT,
                    last_login TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT,
                    color TEXT NOT NULL,
                    estimated_hours REAL,
                    deadline TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    is_completed INTEGER NOT NULL DEFAULT 0,
                    completed_at TEXT,
                    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS task_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    completed INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS time_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE RESTRICT,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    duration INTEGER,
                    is_running INTEGER NOT NULL DEFAULT 0,
                    state TEXT NOT NULL DEFAULT 'finished',
                    notes TEXT,
                    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS whatsapp_integration (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    api_url TEXT NOT NULL,
                    api_key TEXT NOT NULL,
                    instance_name TEXT NOT NULL,
                    phone_number TEXT,
                    authorized_numbers TEXT NOT NULL DEFAULT '[]',
                    restrict_to_group INTEGER NOT NULL DEFAULT 0,
                    allowed_group_jid TEXT,
                    webhook_url TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS whatsapp_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    phone_number TEXT NOT NULL,
                    message TEXT NOT NULL,
                    command TEXT,
                    response TEXT,
                    success INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_task_items_task ON task_items(task_id);
                CREATE INDEX IF NOT EXISTS idx_time_entries_task ON time_entries(task_id);
                CREATE INDEX IF NOT EXISTS idx_time_entries_start ON time_entries(start_time);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_time_entries_one_running
                    ON time_entries(task_id) WHERE is_running = 1;
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    fn task_exists(&self, id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM tasks WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn ensure_no_other_running(&self, task_id: i64, except: Option<i64>) -> Result<()> {
        let clash: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM time_entries WHERE task_id = ?1 AND is_running = 1 AND id != ?2",
            params![task_id, except.unwrap_or(0)],
            |row| row.get(0),
        )?;
        if clash > 0 {
            return Err(Error::conflict(format!(
                "Timer already active for task {}",
                task_id
            )));
        }
        Ok(())
    }

    fn query_entries(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<TimeEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, read_entry_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    fn query_users(&self, clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<User>> {
        let sql = format!("SELECT {} FROM users {}", USER_COLUMNS, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, read_user_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?.into_user()?);
        }
        Ok(users)
    }

    fn write_task(&self, task: &Task) -> Result<()> {
        self.conn.execute(
            "UPDATE tasks SET name = ?1, description = ?2, color = ?3, estimated_hours = ?4,
                 deadline = ?5, is_active = ?6, is_completed = ?7, completed_at = ?8
             WHERE id = ?9",
            params![
                task.name,
                task.description,
                task.color,
                task.estimated_hours,
                ts_opt(&task.deadline),
                task.is_active,
                task.is_completed,
                ts_opt(&task.completed_at),
                task.id
            ],
        )?;
        Ok(())
    }
}

impl Store for SqliteStore {
    // ── Tasks ─────────────────────────────────────────────────────────

    fn list_tasks(&mut self) -> Result<Vec<Task>> {
        let sql = format!("SELECT {} FROM tasks ORDER BY id", TASK_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], read_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    fn get_task(&mut self, id: i64) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], read_task).optional()?)
    }

    fn create_task(&mut self, task: NewTask) -> Result<Task> {
        let name = require_name(&task.name)?;
        let color = task.color.unwrap_or_else(|| DEFAULT_TASK_COLOR.to_string());
        self.conn.execute(
            "INSERT INTO tasks (name, description, color, estimated_hours, deadline, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                name,
                task.description,
                color,
                task.estimated_hours,
                ts_opt(&task.deadline),
                task.user_id,
                ts(&Utc::now())
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?
            .ok_or_else(|| Error::Other(anyhow::anyhow!("Task not found after insert")))
    }

    fn update_task(&mut self, id: i64, update: TaskUpdate) -> Result<Task> {
        let name = update.name.as_deref().map(require_name).transpose()?;
        let mut task = self.get_task(id)?.ok_or_else(|| Error::not_found("Task", id))?;
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
        self.write_task(&task)?;
        Ok(task)
    }

    fn delete_task(&mut self, id: i64) -> Result<bool> {
        if !self.task_exists(id)? {
            return Ok(false);
        }
        let entry_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM time_entries WHERE task_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if entry_count > 0 {
            return Err(Error::conflict(format!(
                "Task {} has {} time entries and cannot be deleted",
                id, entry_count
            )));
        }
        let affected = self.conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn set_task_completion(&mut self, id: i64, at: Option<DateTime<Utc>>) -> Result<Task> {
        let mut task = self.get_task(id)?.ok_or_else(|| Error::not_found("Task", id))?;
        task.is_completed = at.is_some();
        task.completed_at = at;
        self.write_task(&task)?;
        Ok(task)
    }

    // ── Task items ────────────────────────────────────────────────────

    fn list_task_items(&mut self, task_id: i64) -> Result<Vec<TaskItem>> {
        let sql = format!(
            "SELECT {} FROM task_items WHERE task_id = ?1 ORDER BY id",
            ITEM_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![task_id], read_item)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    fn get_task_item(&mut self, id: i64) -> Result<Option<TaskItem>> {
        let sql = format!("SELECT {} FROM task_items WHERE id = ?1", ITEM_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], read_item).optional()?)
    }

    fn create_task_item(&mut self, task_id: i64, title: &str) -> Result<TaskItem> {
        if !self.task_exists(task_id)? {
            return Err(Error::not_found("Task", task_id));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("title", "must not be empty"));
        }
        self.conn.execute(
            "INSERT INTO task_items (task_id, title, created_at) VALUES (?1, ?2, ?3)",
            params![task_id, title, ts(&Utc::now())],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_task_item(id)?
            .ok_or_else(|| Error::Other(anyhow::anyhow!("Task item not found after insert")))
    }

    fn update_task_item(&mut self, id: i64, update: TaskItemUpdate) -> Result<TaskItem> {
        let title = match update.title.as_deref().map(str::trim) {
            Some("") => return Err(Error::validation("title", "must not be empty")),
            other => other.map(str::to_string),
        };
        let mut item = self
            .get_task_item(id)?
            .ok_or_else(|| Error::not_found("Task item", id))?;
        if let Some(title) = title {
            item.title = title;
        }
        if let Some(completed) = update.completed {
            item.completed = completed;
        }
        self.conn.execute(
            "UPDATE task_items SET title = ?1, completed = ?2 WHERE id = ?3",
            params![item.title, item.completed, id],
        )?;
        Ok(item)
    }

    fn delete_task_item(&mut self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM task_items WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn complete_all_task_items(&mut self, task_id: i64) -> Result<usize> {
        if !self.task_exists(task_id)? {
            return Err(Error::not_found("Task", task_id));
        }
        let affected = self.conn.execute(
            "UPDATE task_items SET completed = 1 WHERE task_id = ?1 AND completed = 0",
            params![task_id],
        )?;
        Ok(affected)
    }

    // ── Time entries ──────────────────────────────────────────────────

    fn list_time_entries(&mut self, filter: &EntryFilter) -> Result<Vec<TimeEntry>> {
        let from = filter.from.as_ref().map(ts);
        let to = filter.to.as_ref().map(ts);
        let sql = format!(
            "SELECT {} FROM time_entries
             WHERE (?1 IS NULL OR task_id = ?1)
               AND (?2 IS NULL OR start_time >= ?2)
               AND (?3 IS NULL OR start_time < ?3)
             ORDER BY start_time DESC, id DESC",
            ENTRY_COLUMNS
        );
        self.query_entries(&sql, &[&filter.task_id, &from, &to])
    }

    fn get_time_entry(&mut self, id: i64) -> Result<Option<TimeEntry>> {
        let sql = format!("SELECT {} FROM time_entries WHERE id = ?1", ENTRY_COLUMNS);
        Ok(self.query_entries(&sql, &[&id])?.into_iter().next())
    }

    fn create_time_entry(&mut self, entry: NewTimeEntry) -> Result<TimeEntry> {
        if !self.task_exists(entry.task_id)? {
            return Err(Error::not_found("Task", entry.task_id));
        }
        let is_running = entry.state == EntryState::Running;
        if is_running {
            self.ensure_no_other_running(entry.task_id, None)?;
        }
        let inserted = self.conn.execute(
            "INSERT INTO time_entries (task_id, start_time, end_time, duration, is_running, state, notes, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.task_id,
                ts(&entry.start_time),
                ts_opt(&entry.end_time),
                entry.duration,
                is_running,
                entry.state.as_str(),
                entry.notes,
                entry.user_id,
                ts(&Utc::now())
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(Error::conflict(format!(
                    "Timer already active for task {}",
                    entry.task_id
                )));
            }
            Err(e) => return Err(e.into()),
        }
        let id = self.conn.last_insert_rowid();
        self.get_time_entry(id)?
            .ok_or_else(|| Error::Other(anyhow::anyhow!("Time entry not found after insert")))
    }

    fn update_time_entry(&mut self, id: i64, update: TimeEntryUpdate) -> Result<TimeEntry> {
        let mut entry = self
            .get_time_entry(id)?
            .ok_or_else(|| Error::not_found("Time entry", id))?;
        if update.state == Some(EntryState::Running) {
            self.ensure_no_other_running(entry.task_id, Some(id))?;
        }
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
        let updated = self.conn.execute(
            "UPDATE time_entries SET start_time = ?1, end_time = ?2, duration = ?3,
                 is_running = ?4, state = ?5, notes = ?6
             WHERE id = ?7",
            params![
                ts(&entry.start_time),
                ts_opt(&entry.end_time),
                entry.duration,
                entry.is_running,
                entry.state.as_str(),
                entry.notes,
                id
            ],
        );
        match updated {
            Ok(_) => Ok(entry),
            Err(e) if is_constraint_violation(&e) => Err(Error::conflict(format!(
                "Timer already active for task {}",
                entry.task_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_time_entry(&mut self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM time_entries WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn delete_time_entries(&mut self, ids: &[i64]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM time_entries WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn active_time_entries(&mut self) -> Result<Vec<TimeEntry>> {
        let sql = format!(
            "SELECT {} FROM time_entries WHERE state != 'finished' ORDER BY start_time DESC, id DESC",
            ENTRY_COLUMNS
        );
        self.query_entries(&sql, &[])
    }

    // ── Users ─────────────────────────────────────────────────────────

    fn list_users(&mut self) -> Result<Vec<User>> {
        self.query_users("ORDER BY id", &[])
    }

    fn get_user(&mut self, id: i64) -> Result<Option<User>> {
        Ok(self.query_users("WHERE id = ?1", &[&id])?.into_iter().next())
    }

    fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>> {
        Ok(self
            .query_users("WHERE username = ?1 COLLATE NOCASE", &[&username])?
            .into_iter()
            .next())
    }

    fn find_user_by_api_key(&mut self, api_key: &str) -> Result<Option<User>> {
        Ok(self
            .query_users("WHERE api_key = ?1", &[&api_key])?
            .into_iter()
            .next())
    }

    fn find_user_by_reset_token(&mut self, token: &str) -> Result<Option<User>> {
        Ok(self
            .query_users("WHERE reset_token = ?1", &[&token])?
            .into_iter()
            .next())
    }

    fn create_user(&mut self, user: NewUser) -> Result<User> {
        let username = user.username.trim().to_string();
        if username.is_empty() {
            return Err(Error::validation("username", "must not be empty"));
        }
        if self.find_user_by_username(&username)?.is_some() {
            return Err(Error::conflict(format!("Username '{}' already exists", username)));
        }
        self.conn.execute(
            "INSERT INTO users (username, password_hash, email, full_name, role, api_key, must_reset_password, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                username,
                user.password_hash,
                user.email,
                user.full_name,
                user.role.as_str(),
                user.api_key,
                user.must_reset_password,
                ts(&Utc::now())
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?
            .ok_or_else(|| Error::Other(anyhow::anyhow!("User not found after insert")))
    }

    fn update_user(&mut self, id: i64, update: UserUpdate) -> Result<User> {
        let mut user = self.get_user(id)?.ok_or_else(|| Error::not_found("User", id))?;
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
        self.conn.execute(
            "UPDATE users SET password_hash = ?1, email = ?2, full_name = ?3, role = ?4,
                 is_active = ?5, api_key = ?6, must_reset_password = ?7, reset_token = ?8,
                 reset_token_expires_at = ?9, last_login = ?10
             WHERE id = ?11",
            params![
                user.password_hash,
                user.email,
                user.full_name,
                user.role.as_str(),
                user.is_active,
                user.api_key,
                user.must_reset_password,
                user.reset_token,
                ts_opt(&user.reset_token_expires_at),
                ts_opt(&user.last_login),
                id
            ],
        )?;
        Ok(user)
    }

    fn delete_user(&mut self, id: i64) -> Result<bool> {
        let affected = self.conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    // ── WhatsApp ──────────────────────────────────────────────────────

    fn get_whatsapp_integration(&mut self) -> Result<Option<WhatsAppIntegration>> {
        let sql = format!(
            "SELECT {} FROM whatsapp_integration WHERE id = 1",
            INTEGRATION_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, [], |row| {
                Ok(IntegrationRow {
                    api_url: row.get(0)?,
                    api_key: row.get(1)?,
                    instance_name: row.get(2)?,
                    phone_number: row.get(3)?,
                    authorized_numbers: row.get(4)?,
                    restrict_to_group: row.get(5)?,
                    allowed_group_jid: row.get(6)?,
                    webhook_url: row.get(7)?,
                    is_active: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            })
            .optional()?;
        row.map(IntegrationRow::into_integration).transpose()
    }

    fn save_whatsapp_integration(
        &mut self,
        input: WhatsAppIntegrationInput,
    ) -> Result<WhatsAppIntegration> {
        let numbers = serde_json::to_string(&input.authorized_numbers)?;
        self.conn.execute(
            "INSERT INTO whatsapp_integration (id, api_url, api_key, instance_name, phone_number,
                 authorized_numbers, restrict_to_group, allowed_group_jid, webhook_url, is_active, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 api_url = excluded.api_url,
                 api_key = excluded.api_key,
                 instance_name = excluded.instance_name,
                 phone_number = excluded.phone_number,
                 authorized_numbers = excluded.authorized_numbers,
                 restrict_to_group = excluded.restrict_to_group,
                 allowed_group_jid = excluded.allowed_group_jid,
                 webhook_url = excluded.webhook_url,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
            params![
                input.api_url,
                input.api_key,
                input.instance_name,
                input.phone_number,
                numbers,
                input.restrict_to_group,
                input.allowed_group_jid,
                input.webhook_url,
                input.is_active,
                ts(&Utc::now())
            ],
        )?;
        self.get_whatsapp_integration()?
            .ok_or_else(|| Error::Other(anyhow::anyhow!("Integration not found after upsert")))
    }

    fn append_whatsapp_log(&mut self, log: NewWhatsAppLog) -> Result<WhatsAppLog> {
        self.conn.execute(
            "INSERT INTO whatsapp_logs (phone_number, message, command, response, success, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                log.phone_number,
                log.message,
                log.command,
                log.response,
                log.success,
                log.error_message,
                ts(&Utc::now())
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        let sql = format!("SELECT {} FROM whatsapp_logs WHERE id = ?1", LOG_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], read_log)?)
    }

    fn list_whatsapp_logs(&mut self, limit: usize) -> Result<Vec<WhatsAppLog>> {
        let sql = format!(
            "SELECT {} FROM whatsapp_logs ORDER BY id DESC LIMIT ?1",
            LOG_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], read_log)?;
        let mut logs = Vec::new();
        for row in rows {
            logs.push(row?);
        }
        Ok(logs)
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

fn read_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        estimated_hours: row.get(4)?,
        deadline: row.get(5)?,
        is_active: row.get(6)?,
        is_completed: row.get(7)?,
        completed_at: row.get(8)?,
        user_id: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn read_item(row: &Row<'_>) -> rusqlite::Result<TaskItem> {
    Ok(TaskItem {
        id: row.get(0)?,
        task_id: row.get(1)?,
        title: row.get(2)?,
        completed: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn read_log(row: &Row<'_>) -> rusqlite::Result<WhatsAppLog> {
    Ok(WhatsAppLog {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        message: row.get(2)?,
        command: row.get(3)?,
        response: row.get(4)?,
        success: row.get(5)?,
        error_message: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Intermediate row for time entries before the state string is parsed.
struct EntryRow {
    id: i64,
    task_id: i64,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    duration: Option<i64>,
    is_running: bool,
    state: String,
    notes: Option<String>,
    user_id: Option<i64>,
    created_at: DateTime<Utc>,
}

fn read_entry_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        id: row.get(0)?,
        task_id: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        duration: row.get(4)?,
        is_running: row.get(5)?,
        state: row.get(6)?,
        notes: row.get(7)?,
        user_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl EntryRow {
    fn into_entry(self) -> Result<TimeEntry> {
        let state = EntryState::from_str(&self.state)
            .map_err(|e| Error::Database(anyhow::anyhow!(e)))?;
        Ok(TimeEntry {
            id: self.id,
            task_id: self.task_id,
            start_time: self.start_time,
            end_time: self.end_time,
            duration: self.duration,
            is_running: self.is_running,
            state,
            notes: self.notes,
            user_id: self.user_id,
            created_at: self.created_at,
        })
    }
}

struct UserRow {
    id: i64,
    username: String,
    password_hash: String,
    email: Option<String>,
    full_name: Option<String>,
    role: String,
    is_active: bool,
    api_key: Option<String>,
    must_reset_password: bool,
    reset_token: Option<String>,
    reset_token_expires_at: Option<DateTime<Utc>>,
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

fn read_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        email: row.get(3)?,
        full_name: row.get(4)?,
        role: row.get(5)?,
        is_active: row.get(6)?,
        api_key: row.get(7)?,
        must_reset_password: row.get(8)?,
        reset_token: row.get(9)?,
        reset_token_expires_at: row.get(10)?,
        last_login: row.get(11)?,
        created_at: row.get(12)?,
    })
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        let role = Role::from_str(&self.role).map_err(|e| Error::Database(anyhow::anyhow!(e)))?;
        Ok(User {
            id: self.id,
            username: self.username,
            password_hash: self.password_hash,
            email: self.email,
            full_name: self.full_name,
            role,
            is_active: self.is_active,
            api_key: self.api_key,
            must_reset_password: self.must_reset_password,
            reset_token: self.reset_token,
            reset_token_expires_at: self.reset_token_expires_at,
            last_login: self.last_login,
            created_at: self.created_at,
        })
    }
}

struct IntegrationRow {
    api_url: String,
    api_key: String,
    instance_name: String,
    phone_number: Option<String>,
    authorized_numbers: String,
    restrict_to_group: bool,
    allowed_group_jid: Option<String>,
    webhook_url: Option<String>,
    is_active: bool,
    updated_at: DateTime<Utc>,
}

impl IntegrationRow {
    fn into_integration(self) -> Result<WhatsAppIntegration> {
        let authorized_numbers: Vec<String> = serde_json::from_str(&self.authorized_numbers)?;
        Ok(WhatsAppIntegration {
            api_url: self.api_url,
            api_key: self.api_key,
            instance_name: self.instance_name,
            phone_number: self.phone_number,
            authorized_numbers,
            restrict_to_group: self.restrict_to_group,
            allowed_group_jid: self.allowed_group_jid,
            webhook_url: self.webhook_url,
            is_active: self.is_active,
            updated_at: self.updated_at,
        })
    }
}
