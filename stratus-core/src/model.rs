//! Persisted backup and schedule definitions
//!
//! Field names serialize in PascalCase so exported bundles stay readable by
//! installations that wrote the older format.

use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Schedule ID of a schedule that has not been stored yet
pub const UNSAVED_SCHEDULE_ID: i64 = -1;

/// Setting that disables archive encryption for a backup
pub const NO_ENCRYPTION_OPTION: &str = "no-encryption";
/// Setting holding the archive passphrase
pub const PASSPHRASE_OPTION: &str = "passphrase";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lenient boolean parsing for option values. Empty or unknown text yields `default`.
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "on" | "true" | "yes") => true,
        Some(v) if matches!(v.as_str(), "0" | "off" | "false" | "no") => false,
        _ => default,
    }
}

/// True if `value` is a recognised boolean spelling
pub fn is_bool_literal(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "1" | "on" | "true" | "yes" | "0" | "off" | "false" | "no"
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct FilterRule {
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub include: bool,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Setting {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filter: String,
    #[serde(default)]
    pub argument: bool,
}

impl Setting {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            filter: String::new(),
            argument: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct BackupDefinition {
    /// `None` until the coordinator stores the definition
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(rename = "TargetURL", default, deserialize_with = "null_as_default")]
    pub target_url: String,
    #[serde(rename = "DBPath", default)]
    pub db_path: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: Vec<FilterRule>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: Vec<Setting>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl BackupDefinition {
    pub fn new(name: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_url: target_url.into(),
            ..Default::default()
        }
    }

    /// Value of the last setting named `name`
    pub fn setting(&self, name: &str) -> Option<&str> {
        self.settings
            .iter()
            .rev()
            .find(|s| s.name == name)
            .map(|s| s.value.as_str())
    }

    /// Replace every setting named `name` with a single one holding `value`
    pub fn set_setting(&mut self, name: &str, value: impl Into<String>) {
        self.settings.retain(|s| s.name != name);
        self.settings.push(Setting::new(name, value));
    }

    /// Settings as a name → value map, later entries winning
    pub fn settings_map(&self) -> HashMap<String, String> {
        self.settings
            .iter()
            .map(|s| (s.name.clone(), s.value.clone()))
            .collect()
    }

    /// Whether the archive is unencrypted or its passphrase is stored with the definition
    pub fn is_unencrypted_or_passphrase_stored(&self) -> bool {
        parse_bool(self.setting(NO_ENCRYPTION_OPTION), false)
            || self.setting(PASSPHRASE_OPTION).map_or(false, |p| !p.is_empty())
    }

    pub fn name_matches(&self, other: &str) -> bool {
        self.name.to_lowercase() == other.to_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduleDefinition {
    #[serde(rename = "ID", default = "unsaved_schedule_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub repeat: Option<String>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub allowed_days: Vec<String>,
}

fn unsaved_schedule_id() -> i64 {
    UNSAVED_SCHEDULE_ID
}

impl Default for ScheduleDefinition {
    fn default() -> Self {
        Self {
            id: UNSAVED_SCHEDULE_ID,
            tags: Vec::new(),
            time: None,
            repeat: None,
            last_run: None,
            rule: None,
            allowed_days: Vec::new(),
        }
    }
}

impl ScheduleDefinition {
    /// The tag linking a schedule to the backup with `backup_id`
    pub fn backup_tag(backup_id: &str) -> String {
        format!("ID={}", backup_id)
    }

    pub fn is_linked_to(&self, backup_id: &str) -> bool {
        let tag = Self::backup_tag(backup_id);
        self.tags.iter().any(|t| *t == tag)
    }

    /// Point the back-reference tag at `backup_id`, dropping any previous one
    pub fn link_to(&mut self, backup_id: &str) {
        self.tags.retain(|t| !t.starts_with("ID="));
        self.tags.push(Self::backup_tag(backup_id));
    }
}

/// Serialized form of an exported backup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ImportExportBundle {
    #[serde(default)]
    pub backup: Option<BackupDefinition>,
    #[serde(default)]
    pub schedule: Option<ScheduleDefinition>,
}

/// A stored backup with its schedule, as returned by listings
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct BackupListing {
    pub is_unencrypted_or_passphrase_stored: bool,
    pub backup: BackupDefinition,
    pub schedule: Option<ScheduleDefinition>,
}
