//! Storage of backup and schedule definitions
//!
//! The coordinator owns the store behind its own lock; implementations here do no
//! locking of their own. Every write is all-or-nothing.

use std::io::Write;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use crate::error::{Result, StratusError};
use crate::model::{BackupDefinition, ScheduleDefinition};

pub trait DefinitionStore: Send + Sync {
    fn list_backups(&self) -> Result<Vec<BackupDefinition>>;

    fn list_schedules(&self) -> Result<Vec<ScheduleDefinition>>;

    fn get_backup(&self, id: &str) -> Result<Option<BackupDefinition>>;

    /// Insert or replace `backup` (matched by ID) and `schedule` (matched by schedule ID),
    /// and drop the schedules listed in `remove_schedules`, as one unit.
    fn upsert(
        &mut self,
        backup: &BackupDefinition,
        schedule: Option<&ScheduleDefinition>,
        remove_schedules: &[i64],
    ) -> Result<()>;

    /// Remove a backup and any schedule tagged for it
    fn delete_backup(&mut self, id: &str) -> Result<()>;

    /// Highest numeric backup ID ever stored, deleted backups included
    fn last_backup_id(&self) -> Result<u64> {
        Ok(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    backups: Vec<BackupDefinition>,
    schedules: Vec<ScheduleDefinition>,
    #[serde(default)]
    last_backup_id: u64,
}

impl StoreState {
    fn apply_upsert(
        &mut self,
        backup: &BackupDefinition,
        schedule: Option<&ScheduleDefinition>,
        remove_schedules: &[i64],
    ) -> Result<()> {
        let id = backup.id.as_deref().ok_or_else(|| {
            StratusError::Other("cannot store a backup without an ID".to_string())
        })?;

        match self.backups.iter_mut().find(|b| b.id.as_deref() == Some(id)) {
            Some(existing) => *existing = backup.clone(),
            None => self.backups.push(backup.clone()),
        }
        if let Ok(numeric) = id.parse::<u64>() {
            self.last_backup_id = self.last_backup_id.max(numeric);
        }

        self.schedules.retain(|s| !remove_schedules.contains(&s.id));

        if let Some(schedule) = schedule {
            match self.schedules.iter_mut().find(|s| s.id == schedule.id) {
                Some(existing) => *existing = schedule.clone(),
                None => self.schedules.push(schedule.clone()),
            }
        }

        Ok(())
    }

    fn apply_delete(&mut self, id: &str) -> Result<()> {
        let before = self.backups.len();
        self.backups.retain(|b| b.id.as_deref() != Some(id));
        if self.backups.len() == before {
            return Err(StratusError::BackupNotFound(id.to_string()));
        }
        self.schedules.retain(|s| !s.is_linked_to(id));
        Ok(())
    }
}

/// Volatile store, used for tests and ephemeral servers
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: StoreState,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DefinitionStore for MemoryStore {
    fn list_backups(&self) -> Result<Vec<BackupDefinition>> {
        Ok(self.state.backups.clone())
    }

    fn list_schedules(&self) -> Result<Vec<ScheduleDefinition>> {
        Ok(self.state.schedules.clone())
    }

    fn get_backup(&self, id: &str) -> Result<Option<BackupDefinition>> {
        Ok(self.state.backups.iter().find(|b| b.id.as_deref() == Some(id)).cloned())
    }

    fn upsert(
        &mut self,
        backup: &BackupDefinition,
        schedule: Option<&ScheduleDefinition>,
        remove_schedules: &[i64],
    ) -> Result<()> {
        let mut next = self.state.clone();
        next.apply_upsert(backup, schedule, remove_schedules)?;
        self.state = next;
        Ok(())
    }

    fn delete_backup(&mut self, id: &str) -> Result<()> {
        self.state.apply_delete(id)
    }

    fn last_backup_id(&self) -> Result<u64> {
        Ok(self.state.last_backup_id)
    }
}

/// Store persisted as a single JSON document, replaced atomically on every write
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: StoreState,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let state: StoreState = serde_json::from_str(&data)?;
            info!(
                "Loaded definition store {}: {} backups, {} schedules",
                path.display(),
                state.backups.len(),
                state.schedules.len()
            );
            state
        } else {
            StoreState::default()
        };

        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_state(&self, state: &StoreState) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let data = serde_json::to_vec_pretty(state)?;
        let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| StratusError::Io(e.error))?;

        debug!("Saved definition store: {} backups", state.backups.len());
        Ok(())
    }

    fn commit(&mut self, next: StoreState) -> Result<()> {
        self.write_state(&next)?;
        self.state = next;
        Ok(())
    }
}

impl DefinitionStore for JsonFileStore {
    fn list_backups(&self) -> Result<Vec<BackupDefinition>> {
        Ok(self.state.backups.clone())
    }

    fn list_schedules(&self) -> Result<Vec<ScheduleDefinition>> {
        Ok(self.state.schedules.clone())
    }

    fn get_backup(&self, id: &str) -> Result<Option<BackupDefinition>> {
        Ok(self.state.backups.iter().find(|b| b.id.as_deref() == Some(id)).cloned())
    }

    fn upsert(
        &mut self,
        backup: &BackupDefinition,
        schedule: Option<&ScheduleDefinition>,
        remove_schedules: &[i64],
    ) -> Result<()> {
        let mut next = self.state.clone();
        next.apply_upsert(backup, schedule, remove_schedules)?;
        self.commit(next)
    }

    fn delete_backup(&mut self, id: &str) -> Result<()> {
        let mut next = self.state.clone();
        next.apply_delete(id)?;
        self.commit(next)
    }

    fn last_backup_id(&self) -> Result<u64> {
        Ok(self.state.last_backup_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stored(id: &str, name: &str) -> BackupDefinition {
        let mut backup = BackupDefinition::new(name, "file:///tmp/target");
        backup.id = Some(id.to_string());
        backup
    }

    fn schedule_for(id: i64, backup_id: &str) -> ScheduleDefinition {
        let mut schedule = ScheduleDefinition { id, ..Default::default() };
        schedule.link_to(backup_id);
        schedule
    }

    #[test]
    fn test_memory_upsert_replaces_by_id() {
        let mut store = MemoryStore::new();
        store.upsert(&stored("1", "first"), None, &[]).unwrap();
        store.upsert(&stored("1", "renamed"), None, &[]).unwrap();

        let backups = store.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].name, "renamed");
    }

    #[test]
    fn test_upsert_without_id_is_rejected() {
        let mut store = MemoryStore::new();
        let backup = BackupDefinition::new("draft", "file:///tmp");
        assert!(store.upsert(&backup, None, &[]).is_err());
        assert!(store.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_remove_schedules_in_same_write() {
        let mut store = MemoryStore::new();
        store.upsert(&stored("1", "a"), Some(&schedule_for(1, "1")), &[]).unwrap();
        store.upsert(&stored("1", "a"), Some(&schedule_for(2, "1")), &[1]).unwrap();

        let schedules = store.list_schedules().unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].id, 2);
    }

    #[test]
    fn test_delete_removes_linked_schedule() {
        let mut store = MemoryStore::new();
        store.upsert(&stored("1", "a"), Some(&schedule_for(1, "1")), &[]).unwrap();
        store.delete_backup("1").unwrap();

        assert!(store.list_backups().unwrap().is_empty());
        assert!(store.list_schedules().unwrap().is_empty());
        assert!(matches!(store.delete_backup("1"), Err(StratusError::BackupNotFound(_))));
    }

    #[test]
    fn test_last_backup_id_survives_delete() {
        let mut store = MemoryStore::new();
        store.upsert(&stored("1", "a"), None, &[]).unwrap();
        store.upsert(&stored("2", "b"), None, &[]).unwrap();
        store.delete_backup("2").unwrap();

        assert_eq!(store.last_backup_id().unwrap(), 2);
        assert_eq!(store.list_backups().unwrap().len(), 1);
    }

    #[test]
    fn test_json_store_keeps_last_backup_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("definitions.json");
        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store.upsert(&stored("7", "a"), None, &[]).unwrap();
            store.delete_backup("7").unwrap();
        }
        assert_eq!(JsonFileStore::open(&path).unwrap().last_backup_id().unwrap(), 7);

        std::fs::write(&path, r#"{"backups": [], "schedules": []}"#).unwrap();
        assert_eq!(JsonFileStore::open(&path).unwrap().last_backup_id().unwrap(), 0);
    }

    #[test]
    fn test_json_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("definitions.json");

        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store.upsert(&stored("1", "Nightly"), Some(&schedule_for(1, "1")), &[]).unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get_backup("1").unwrap().unwrap().name, "Nightly");
        assert_eq!(store.list_schedules().unwrap().len(), 1);
        assert!(store.get_backup("2").unwrap().is_none());
    }

    #[test]
    fn test_json_store_failed_write_keeps_state() {
        let dir = TempDir::new().unwrap();
        let mut store = JsonFileStore::open(dir.path().join("definitions.json")).unwrap();
        store.upsert(&stored("1", "a"), None, &[]).unwrap();

        let draft = BackupDefinition::new("b", "file:///tmp");
        assert!(store.upsert(&draft, None, &[]).is_err());

        let reopened = JsonFileStore::open(store.path()).unwrap();
        assert_eq!(reopened.list_backups().unwrap().len(), 1);
    }
}
