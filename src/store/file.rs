//! Embedded file database: the full dataset as one JSON document.
//!
//! Reads are served from the in-memory copy; every successful mutation
//! rewrites the document through a temporary file and an atomic rename, so a
//! crash mid-write leaves the previous version intact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};

use super::{MemoryStore, Store};
use crate::errors::Result;
use crate::models::*;

pub struct JsonFileStore {
    path: PathBuf,
    data: MemoryStore,
}

impl JsonFileStore {
    /// Open the document at `path`, creating an empty one if it is missing.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let data = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if raw.trim().is_empty() {
                MemoryStore::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
        } else {
            MemoryStore::new()
        };
        persist(path, &data)?;
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a mutation to a copy of the dataset and adopt the copy only
    /// once it is on disk. On any error the store is left unchanged.
    fn write<R>(&mut self, f: impl FnOnce(&mut MemoryStore) -> Result<R>) -> Result<R> {
        let mut next = self.data.clone();
        let out = f(&mut next)?;
        persist(&self.path, &next)?;
        self.data = next;
        Ok(out)
    }
}

fn persist(path: &Path, data: &MemoryStore) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl Store for JsonFileStore {
    fn list_tasks(&mut self) -> Result<Vec<Task>> {
        self.data.list_tasks()
    }

    fn get_task(&mut self, id: i64) -> Result<Option<Task>> {
        self.data.get_task(id)
    }

    fn create_task(&mut self, task: NewTask) -> Result<Task> {
        self.write(|d| d.create_task(task))
    }

    fn update_task(&mut self, id: i64, update: TaskUpdate) -> Result<Task> {
        self.write(|d| d.update_task(id, update))
    }

    fn delete_task(&mut self, id: i64) -> Result<bool> {
        self.write(|d| d.delete_task(id))
    }

    fn set_task_completion(&mut self, id: i64, at: Option<DateTime<Utc>>) -> Result<Task> {
        self.write(|d| d.set_task_completion(id, at))
    }

    fn list_task_items(&mut self, task_id: i64) -> Result<Vec<TaskItem>> {
        self.data.list_task_items(task_id)
    }

    fn get_task_item(&mut self, id: i64) -> Result<Option<TaskItem>> {
        self.data.get_task_item(id)
    }

    fn create_task_item(&mut self, task_id: i64, title: &str) -> Result<TaskItem> {
        self.write(|d| d.create_task_item(task_id, title))
    }

    fn update_task_item(&mut self, id: i64, update: TaskItemUpdate) -> Result<TaskItem> {
        self.write(|d| d.update_task_item(id, update))
    }

    fn delete_task_item(&mut self, id: i64) -> Result<bool> {
        self.write(|d| d.delete_task_item(id))
    }

    fn complete_all_task_items(&mut self, task_id: i64) -> Result<usize> {
        self.write(|d| d.complete_all_task_items(task_id))
    }

    fn list_time_entries(&mut self, filter: &EntryFilter) -> Result<Vec<TimeEntry>> {
        self.data.list_time_entries(filter)
    }

    fn get_time_entry(&mut self, id: i64) -> Result<Option<TimeEntry>> {
        self.data.get_time_entry(id)
    }

    fn create_time_entry(&mut self, entry: NewTimeEntry) -> Result<TimeEntry> {
        self.write(|d| d.create_time_entry(entry))
    }

    fn update_time_entry(&mut self, id: i64, update: TimeEntryUpdate) -> Result<TimeEntry> {
        self.write(|d| d.update_time_entry(id, update))
    }

    fn delete_time_entry(&mut self, id: i64) -> Result<bool> {
        self.write(|d| d.delete_time_entry(id))
    }

    fn delete_time_entries(&mut self, ids: &[i64]) -> Result<usize> {
        self.write(|d| d.delete_time_entries(ids))
    }

    fn active_time_entries(&mut self) -> Result<Vec<TimeEntry>> {
        self.data.active_time_entries()
    }

    fn list_users(&mut self) -> Result<Vec<User>> {
        self.data.list_users()
    }

    fn get_user(&mut self, id: i64) -> Result<Option<User>> {
        self.data.get_user(id)
    }

    fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>> {
        self.data.find_user_by_username(username)
    }

    fn find_user_by_api_key(&mut self, api_key: &str) -> Result<Option<User>> {
        self.data.find_user_by_api_key(api_key)
    }

    fn find_user_by_reset_token(&mut self, token: &str) -> Result<Option<User>> {
        self.data.find_user_by_reset_token(token)
    }

    fn create_user(&mut self, user: NewUser) -> Result<User> {
        self.write(|d| d.create_user(user))
    }

    fn update_user(&mut self, id: i64, update: UserUpdate) -> Result<User> {
        self.write(|d| d.update_user(id, update))
    }

    fn delete_user(&mut self, id: i64) -> Result<bool> {
        self.write(|d| d.delete_user(id))
    }

    fn get_whatsapp_integration(&mut self) -> Result<Option<WhatsAppIntegration>> {
        self.data.get_whatsapp_integration()
    }

    fn save_whatsapp_integration(
        &mut self,
        input: WhatsAppIntegrationInput,
    ) -> Result<WhatsAppIntegration> {
        self.write(|d| d.save_whatsapp_integration(input))
    }

    fn append_whatsapp_log(&mut self, log: NewWhatsAppLog) -> Result<WhatsAppLog> {
        self.write(|d| d.append_whatsapp_log(log))
    }

    fn list_whatsapp_logs(&mut self, limit: usize) -> Result<Vec<WhatsAppLog>> {
        self.data.list_whatsapp_logs(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_document() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pontual.json");
        let _store = JsonFileStore::open(&path)?;
        assert!(path.exists());
        let raw = fs::read_to_string(&path)?;
        let json: serde_json::Value = serde_json::from_str(&raw)?;
        assert!(json["tasks"].as_array().is_some_and(|t| t.is_empty()));
        Ok(())
    }

    #[test]
    fn test_data_survives_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pontual.json");
        {
            let mut store = JsonFileStore::open(&path)?;
            let task = store.create_task(NewTask {
                name: "Relatório".into(),
                ..Default::default()
            })?;
            store.create_task_item(task.id, "Revisar números")?;
        }
        let mut reopened = JsonFileStore::open(&path)?;
        let tasks = reopened.list_tasks()?;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "Relatório");
        assert_eq!(reopened.list_task_items(tasks[0].id)?.len(), 1);

        // Sequences are persisted too: ids keep increasing after reopen.
        let second = reopened.create_task(NewTask {
            name: "Outra".into(),
            ..Default::default()
        })?;
        assert_eq!(second.id, 2);
        Ok(())
    }

    #[test]
    fn test_failed_mutation_is_not_persisted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pontual.json");
        let mut store = JsonFileStore::open(&path)?;
        let before = fs::read_to_string(&path)?;
        assert!(store.create_task(NewTask::default()).is_err());
        assert_eq!(fs::read_to_string(&path)?, before);
        Ok(())
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pontual.json");
        let mut store = JsonFileStore::open(&path)?;

        // A directory where the temp file should go makes the write fail.
        let tmp = path.with_extension("json.tmp");
        fs::create_dir(&tmp)?;
        let err = store.create_task(NewTask {
            name: "Perdida".into(),
            ..Default::default()
        });
        assert!(matches!(err, Err(crate::errors::Error::Io(_))));
        assert!(store.list_tasks()?.is_empty());

        fs::remove_dir(&tmp)?;
        let task = store.create_task(NewTask {
            name: "Salva".into(),
            ..Default::default()
        })?;
        assert_eq!(task.id, 1);

        let mut reopened = JsonFileStore::open(&path)?;
        let names: Vec<String> = reopened.list_tasks()?.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Salva".to_string()]);
        Ok(())
    }

    #[test]
    fn test_temp_file_is_cleaned_up() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pontual.json");
        let mut store = JsonFileStore::open(&path)?;
        store.create_task(NewTask {
            name: "x".into(),
            ..Default::default()
        })?;
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(store.path(), path.as_path());
        Ok(())
    }
}
