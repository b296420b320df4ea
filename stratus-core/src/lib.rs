//! Shared types for the Stratus backup control plane: errors, the definition model,
//! the settings encryption envelope and definition storage.

pub mod crypto;
pub mod device;
pub mod error;
pub mod model;
pub mod store;
pub mod timespan;

pub use error::{Result, StorageErrorType, StratusError};
pub use crypto::{FieldValue, KeyInstance};
pub use model::{
    BackupDefinition, BackupListing, FilterRule, ImportExportBundle, ScheduleDefinition, Setting,
};
pub use store::{DefinitionStore, JsonFileStore, MemoryStore};
