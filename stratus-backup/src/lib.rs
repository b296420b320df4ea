//! Backup definition management: creation, validation, export and import

pub mod bundle;
pub mod coordinator;
pub mod db_locator;
pub mod secrets;
pub mod validation;

pub use coordinator::{
    BackupRegistryCoordinator, CreateOptions, ExportOptions, ImportMode, ImportOptions,
    ImportOutcome,
};
pub use db_locator::DatabaseLocator;
