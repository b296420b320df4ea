//! Orchestrates every change to the set of backup definitions
//!
//! The store, the database locator and temporary registrations share one lock.
//! Writers hold it across the uniqueness check, validation and commit, so two
//! callers can never both pass the name check for the same name.
//!
//! Secret settings are envelope-encrypted before they reach the store and
//! decrypted again on every read.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use tempfile::TempPath;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use stratus_backends::BackendRegistry;
use stratus_core::model::UNSAVED_SCHEDULE_ID;
use stratus_core::{
    BackupDefinition, BackupListing, DefinitionStore, ImportExportBundle, KeyInstance, Result,
    ScheduleDefinition, StratusError,
};
use crate::db_locator::DatabaseLocator;
use crate::{bundle, secrets, validation};

/// Highest suffix tried when a direct import renames a clashing definition
const MAX_RENAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Reuse the database the locator already knows for the target URL
    pub existing_db: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub include_metadata: bool,
    pub encrypt_secrets: bool,
    /// Seal the bundle with this passphrase
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Parse and return the bundle without storing anything
    Preview,
    /// Store through the normal create path; a clashing name fails
    #[default]
    Strict,
    /// Store, renaming to `Name (n)` when the name is taken
    Direct,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    pub import_metadata: bool,
    pub mode: ImportMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Preview(ImportExportBundle),
    Created { id: String, name: String },
}

struct TemporaryBackup {
    definition: BackupDefinition,
    _db_file: TempPath,
}

struct CoordinatorState {
    store: Box<dyn DefinitionStore>,
    locator: DatabaseLocator,
    temporary: HashMap<String, TemporaryBackup>,
}

pub struct BackupRegistryCoordinator {
    state: RwLock<CoordinatorState>,
    registry: Arc<BackendRegistry>,
    key: Arc<KeyInstance>,
}

impl BackupRegistryCoordinator {
    pub fn new(
        store: Box<dyn DefinitionStore>,
        registry: Arc<BackendRegistry>,
        key: Arc<KeyInstance>,
        locator: DatabaseLocator,
    ) -> Self {
        Self {
            state: RwLock::new(CoordinatorState {
                store,
                locator,
                temporary: HashMap::new(),
            }),
            registry,
            key,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn key(&self) -> &KeyInstance {
        &self.key
    }

    /// Validate and persist a new definition, returning its assigned ID
    #[instrument(skip(self, candidate, schedule), fields(name = %candidate.name))]
    pub fn create(
        &self,
        candidate: BackupDefinition,
        schedule: Option<ScheduleDefinition>,
        options: CreateOptions,
    ) -> Result<String> {
        let mut state = self.state.write();
        self.create_locked(&mut state, candidate, schedule, options)
    }

    fn create_locked(
        &self,
        state: &mut CoordinatorState,
        mut candidate: BackupDefinition,
        schedule: Option<ScheduleDefinition>,
        options: CreateOptions,
    ) -> Result<String> {
        candidate.id = None;
        candidate.db_path = None;

        let existing = state.store.list_backups()?;
        if existing.iter().any(|b| b.name_matches(&candidate.name)) {
            return Err(StratusError::NameConflict(candidate.name));
        }

        validation::validate(&self.registry, &candidate, schedule.as_ref())
            .map_err(StratusError::Validation)?;

        let db_path = if options.existing_db {
            state.locator.locate(&candidate.target_url).ok_or_else(|| {
                StratusError::Validation("Unable to find remote db path?".to_string())
            })?
        } else {
            state.locator.generate_path()
        };

        secrets::protect(&mut candidate, &self.registry, &self.key)?;

        let id = next_backup_id(&existing, state.store.last_backup_id()?)?;
        candidate.id = Some(id.clone());
        candidate.db_path = Some(db_path.to_string_lossy().into_owned());

        commit(state, &candidate, schedule)?;

        if !options.existing_db {
            if let Err(e) = state.locator.register(&candidate.target_url, &db_path) {
                warn!("Backup {} stored but its database location was not recorded: {}", id, e);
            }
        }

        info!("Created backup {} ({})", candidate.name, id);
        Ok(id)
    }

    /// Keep a validated definition in memory only, backed by a temporary database file.
    ///
    /// The file is removed when the registration is dropped.
    #[instrument(skip(self, candidate), fields(name = %candidate.name))]
    pub fn register_temporary(&self, mut candidate: BackupDefinition) -> Result<String> {
        validation::validate(&self.registry, &candidate, None).map_err(StratusError::Validation)?;

        let db_file = tempfile::Builder::new()
            .prefix("stratus-")
            .suffix(".sqlite")
            .tempfile()?
            .into_temp_path();

        let id = Uuid::new_v4().to_string();
        candidate.id = Some(id.clone());
        candidate.db_path = Some(db_file.to_string_lossy().into_owned());

        self.state.write().temporary.insert(
            id.clone(),
            TemporaryBackup { definition: candidate, _db_file: db_file },
        );
        debug!("Registered temporary backup {}", id);
        Ok(id)
    }

    pub fn temporary(&self, id: &str) -> Option<BackupDefinition> {
        self.state.read().temporary.get(id).map(|t| t.definition.clone())
    }

    /// Forget a temporary registration and delete its database file
    pub fn drop_temporary(&self, id: &str) -> bool {
        self.state.write().temporary.remove(id).is_some()
    }

    /// Replace a stored definition, matched by its ID.
    ///
    /// Passing no schedule unlinks any schedule the backup had.
    #[instrument(skip(self, candidate, schedule), fields(id = ?candidate.id))]
    pub fn update(
        &self,
        mut candidate: BackupDefinition,
        schedule: Option<ScheduleDefinition>,
    ) -> Result<()> {
        let mut state = self.state.write();

        let id = candidate
            .id
            .clone()
            .ok_or_else(|| StratusError::BackupNotFound(String::new()))?;
        let stored = state
            .store
            .get_backup(&id)?
            .ok_or_else(|| StratusError::BackupNotFound(id.clone()))?;

        let clash = state
            .store
            .list_backups()?
            .into_iter()
            .any(|b| b.id.as_deref() != Some(id.as_str()) && b.name_matches(&candidate.name));
        if clash {
            return Err(StratusError::NameConflict(candidate.name));
        }

        validation::validate(&self.registry, &candidate, schedule.as_ref())
            .map_err(StratusError::Validation)?;

        if candidate.db_path.as_deref().map_or(true, str::is_empty) {
            candidate.db_path = stored.db_path;
        }
        secrets::protect(&mut candidate, &self.registry, &self.key)?;

        commit(&mut state, &candidate, schedule)?;
        info!("Updated backup {} ({})", candidate.name, id);
        Ok(())
    }

    pub fn validate(
        &self,
        backup: &BackupDefinition,
        schedule: Option<&ScheduleDefinition>,
    ) -> std::result::Result<(), String> {
        validation::validate(&self.registry, backup, schedule)
    }

    /// Every stored backup with the schedule linked to it
    pub fn list(&self) -> Result<Vec<BackupListing>> {
        let state = self.state.read();
        let schedules = state.store.list_schedules()?;

        state
            .store
            .list_backups()?
            .into_iter()
            .map(|backup| self.revealed(backup).map(|b| listing(b, &schedules)))
            .collect()
    }

    pub fn get(&self, id: &str) -> Result<BackupListing> {
        let state = self.state.read();
        let backup = state
            .store
            .get_backup(id)?
            .ok_or_else(|| StratusError::BackupNotFound(id.to_string()))?;
        Ok(listing(self.revealed(backup)?, &state.store.list_schedules()?))
    }

    fn revealed(&self, mut backup: BackupDefinition) -> Result<BackupDefinition> {
        secrets::reveal(&mut backup, &self.key)?;
        Ok(backup)
    }

    #[instrument(skip(self, options))]
    pub fn export(&self, id: &str, options: &ExportOptions) -> Result<Vec<u8>> {
        let BackupListing { backup, schedule, .. } = self.get(id)?;
        self.export_definition(backup, schedule, options)
    }

    /// Serialize a definition for transfer to another installation
    pub fn export_definition(
        &self,
        mut backup: BackupDefinition,
        schedule: Option<ScheduleDefinition>,
        options: &ExportOptions,
    ) -> Result<Vec<u8>> {
        let backup_id = backup.id.take();
        backup.db_path = None;
        if !options.include_metadata {
            backup.metadata = Some(HashMap::new());
        }

        if options.encrypt_secrets {
            secrets::protect(&mut backup, &self.registry, &self.key)?;
        }

        let schedule = schedule.map(|mut s| {
            s.id = UNSAVED_SCHEDULE_ID;
            if let Some(id) = &backup_id {
                let tag = ScheduleDefinition::backup_tag(id);
                s.tags.retain(|t| *t != tag);
            }
            s
        });

        let json = bundle::encode(&ImportExportBundle { backup: Some(backup), schedule })?;
        match options.passphrase.as_deref().filter(|p| !p.is_empty()) {
            Some(passphrase) => bundle::seal(&json, passphrase),
            None => Ok(json),
        }
    }

    /// Import an exported bundle.
    ///
    /// `password` is asked only when the bundle is sealed.
    #[instrument(skip(self, data, password), fields(len = data.len()))]
    pub fn import(
        &self,
        data: &[u8],
        options: &ImportOptions,
        password: impl FnOnce() -> Option<String>,
    ) -> Result<ImportOutcome> {
        let result = self.import_bundle(data, options, password);
        if let Err(e) = &result {
            error!("Failed to import backup: {}", e);
        }
        result
    }

    pub fn import_file(
        &self,
        path: &Path,
        options: &ImportOptions,
        password: impl FnOnce() -> Option<String>,
    ) -> Result<ImportOutcome> {
        let data = std::fs::read(path).map_err(|e| {
            error!("Failed to read {}: {}", path.display(), e);
            StratusError::Io(e)
        })?;
        self.import(&data, options, password)
    }

    fn import_bundle(
        &self,
        data: &[u8],
        options: &ImportOptions,
        password: impl FnOnce() -> Option<String>,
    ) -> Result<ImportOutcome> {
        let json = if bundle::is_sealed(data) {
            let passphrase = password().filter(|p| !p.is_empty()).ok_or_else(|| {
                StratusError::Encryption("A passphrase is required to open this bundle".to_string())
            })?;
            bundle::open(data, &passphrase)?
        } else {
            data.to_vec()
        };

        let parsed = bundle::decode(&json)?;
        let mut backup = parsed.backup.ok_or(StratusError::MissingBackup)?;
        backup.id = None;
        backup.db_path = None;

        let metadata = backup.metadata.get_or_insert_with(HashMap::new);
        if !options.import_metadata {
            metadata.clear();
        }

        let decrypted = secrets::reveal(&mut backup, &self.key)?;
        if decrypted > 0 {
            debug!("Decrypted {} values of imported backup {}", decrypted, backup.name);
        }

        let schedule = parsed.schedule.map(|mut s| {
            s.id = UNSAVED_SCHEDULE_ID;
            s
        });

        match options.mode {
            ImportMode::Preview => Ok(ImportOutcome::Preview(ImportExportBundle {
                backup: Some(backup),
                schedule,
            })),
            ImportMode::Strict => {
                let name = backup.name.clone();
                let id = self.create(backup, schedule, CreateOptions::default())?;
                Ok(ImportOutcome::Created { id, name })
            }
            ImportMode::Direct => {
                let mut state = self.state.write();
                let name = unique_name(&state.store.list_backups()?, &backup.name)?;
                backup.name = name.clone();
                let id = self.create_locked(&mut state, backup, schedule, CreateOptions::default())?;
                Ok(ImportOutcome::Created { id, name })
            }
        }
    }
}

/// Store `backup` and its schedule, dropping any other schedule linked to the backup
fn commit(
    state: &mut CoordinatorState,
    backup: &BackupDefinition,
    schedule: Option<ScheduleDefinition>,
) -> Result<()> {
    let id = backup
        .id
        .as_deref()
        .ok_or_else(|| StratusError::Other("cannot commit a backup without an ID".to_string()))?;
    let schedules = state.store.list_schedules()?;

    let schedule = schedule.map(|mut s| {
        if s.id == UNSAVED_SCHEDULE_ID {
            s.id = schedules.iter().map(|s| s.id).max().unwrap_or(0).max(0) + 1;
        }
        s.link_to(id);
        s
    });

    let stale: Vec<i64> = schedules
        .iter()
        .filter(|s| s.is_linked_to(id))
        .map(|s| s.id)
        .filter(|sid| schedule.as_ref().map_or(true, |s| s.id != *sid))
        .collect();
    if !stale.is_empty() {
        debug!("Unlinking schedules {:?} from backup {}", stale, id);
    }

    state.store.upsert(backup, schedule.as_ref(), &stale)
}

fn listing(backup: BackupDefinition, schedules: &[ScheduleDefinition]) -> BackupListing {
    let schedule = backup
        .id
        .as_deref()
        .and_then(|id| schedules.iter().find(|s| s.is_linked_to(id)))
        .cloned();
    BackupListing {
        is_unencrypted_or_passphrase_stored: backup.is_unencrypted_or_passphrase_stored(),
        backup,
        schedule,
    }
}

/// One past the highest ID ever issued, so IDs of deleted backups are never reused
fn next_backup_id(existing: &[BackupDefinition], last_issued: u64) -> Result<String> {
    let max = existing
        .iter()
        .filter_map(|b| b.id.as_deref()?.parse::<u64>().ok())
        .fold(last_issued, u64::max);
    max.checked_add(1)
        .map(|id| id.to_string())
        .ok_or_else(|| StratusError::Other("no backup IDs left to assign".to_string()))
}

fn unique_name(existing: &[BackupDefinition], name: &str) -> Result<String> {
    let taken = |candidate: &str| existing.iter().any(|b| b.name_matches(candidate));
    if !taken(name) {
        return Ok(name.to_string());
    }

    (1..=MAX_RENAME_ATTEMPTS)
        .map(|n| format!("{} ({})", name, n))
        .find(|candidate| !taken(candidate))
        .ok_or_else(|| StratusError::NameConflict(name.to_string()))
}
