//! Checks a definition must pass before it is stored
//!
//! Every check returns the first problem found as a human readable message.

use regex::Regex;
use stratus_backends::{BackendOptions, BackendRegistry, TargetUrl};
use stratus_core::model::{parse_bool, NO_ENCRYPTION_OPTION, PASSPHRASE_OPTION};
use stratus_core::timespan::parse_timespan;
use stratus_core::{BackupDefinition, FilterRule, ScheduleDefinition, StratusError};

const WEEKDAYS: &[&str] = &[
    "mon", "tue", "wed", "thu", "fri", "sat", "sun",
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];

pub fn validate(
    registry: &BackendRegistry,
    backup: &BackupDefinition,
    schedule: Option<&ScheduleDefinition>,
) -> Result<(), String> {
    if backup.name.trim().is_empty() {
        return Err("Missing a name".to_string());
    }

    validate_target(registry, backup)?;

    for filter in &backup.filters {
        validate_filter(filter)?;
    }

    let unencrypted = parse_bool(backup.setting(NO_ENCRYPTION_OPTION), false);
    let has_passphrase = backup.setting(PASSPHRASE_OPTION).map_or(false, |p| !p.is_empty());
    if !unencrypted && !has_passphrase {
        return Err(format!(
            "Missing passphrase, set --{} to store backups unencrypted",
            NO_ENCRYPTION_OPTION
        ));
    }

    if let Some(schedule) = schedule {
        validate_schedule(schedule)?;
    }

    Ok(())
}

fn validate_target(registry: &BackendRegistry, backup: &BackupDefinition) -> Result<(), String> {
    if backup.target_url.trim().is_empty() {
        return Err("Missing a target URL".to_string());
    }

    let url = TargetUrl::parse(&backup.target_url).map_err(|e| match e {
        StratusError::Validation(message) => message,
        other => other.to_string(),
    })?;
    let resolved = registry
        .resolve(url.protocol_key())
        .map_err(|_| format!("Unsupported backend: {}", url.protocol_key()))?;

    let options = BackendOptions::merged(
        backup.settings.iter().map(|s| (s.name.as_str(), s.value.as_str())),
        &url,
    );

    for descriptor in resolved.supported_options() {
        match options.get(&descriptor.name) {
            None if descriptor.required => {
                return Err(format!("Missing required option --{}", descriptor.name));
            }
            None => {}
            Some(value) => descriptor.check_value(value)?,
        }
    }

    Ok(())
}

/// `[...]` is a regular expression, anything else a glob
fn validate_filter(filter: &FilterRule) -> Result<(), String> {
    let expression = filter.expression.trim();
    if expression.is_empty() {
        return Err("Empty filter expression".to_string());
    }

    if expression.len() >= 2 && expression.starts_with('[') && expression.ends_with(']') {
        let pattern = &expression[1..expression.len() - 1];
        Regex::new(pattern)
            .map_err(|e| format!("Invalid filter expression {}: {}", expression, e))?;
    }

    Ok(())
}

fn validate_schedule(schedule: &ScheduleDefinition) -> Result<(), String> {
    if let Some(repeat) = schedule.repeat.as_deref().filter(|r| !r.trim().is_empty()) {
        parse_timespan(repeat)
            .map_err(|e| format!("Invalid schedule repeat \"{}\": {}", repeat, e))?;
    }

    for day in &schedule.allowed_days {
        if !WEEKDAYS.contains(&day.trim().to_ascii_lowercase().as_str()) {
            return Err(format!("Invalid allowed day \"{}\"", day));
        }
    }

    Ok(())
}
