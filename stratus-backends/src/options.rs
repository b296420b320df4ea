//! Option schema declared by every backend, and the option values handed to it

use std::collections::BTreeMap;
use std::time::Duration;
use serde::Serialize;
use stratus_core::model::{is_bool_literal, parse_bool};
use stratus_core::timespan::parse_timespan;
use stratus_core::{Result, StorageErrorType, StratusError};
use crate::target::TargetUrl;

/// Option names shared by most network backends
pub const AUTH_USERNAME: &str = "auth-username";
pub const AUTH_PASSWORD: &str = "auth-password";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptionKind {
    String,
    Password,
    Boolean,
    Enumeration,
    Flags,
    Timespan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionDescriptor {
    pub name: String,
    pub kind: OptionKind,
    pub short_description: String,
    pub long_description: String,
    pub default_value: Option<String>,
    pub allowed_values: Vec<String>,
    pub required: bool,
}

impl OptionDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: OptionKind,
        short_description: impl Into<String>,
        long_description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            short_description: short_description.into(),
            long_description: long_description.into(),
            default_value: None,
            allowed_values: Vec::new(),
            required: false,
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_allowed(mut self, values: &[&str]) -> Self {
        self.allowed_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_secret(&self) -> bool {
        self.kind == OptionKind::Password
    }

    fn is_allowed(&self, value: &str) -> bool {
        self.allowed_values.iter().any(|a| a.eq_ignore_ascii_case(value.trim()))
    }

    /// Check `value` against the declared type, returning a message naming the option
    pub fn check_value(&self, value: &str) -> std::result::Result<(), String> {
        match self.kind {
            OptionKind::String | OptionKind::Password => Ok(()),
            OptionKind::Boolean if is_bool_literal(value) => Ok(()),
            OptionKind::Boolean => Err(format!(
                "The value \"{}\" for option --{} is not a boolean", value, self.name
            )),
            OptionKind::Enumeration if self.is_allowed(value) => Ok(()),
            OptionKind::Enumeration => Err(format!(
                "The value \"{}\" for option --{} is not one of: {}",
                value, self.name, self.allowed_values.join(", ")
            )),
            OptionKind::Flags => {
                let invalid: Vec<&str> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|flag| !flag.is_empty() && !self.is_allowed(flag))
                    .collect();
                if invalid.is_empty() {
                    Ok(())
                } else {
                    Err(format!(
                        "The flags \"{}\" for option --{} are not among: {}",
                        invalid.join(","), self.name, self.allowed_values.join(", ")
                    ))
                }
            }
            OptionKind::Timespan => parse_timespan(value)
                .map(|_| ())
                .map_err(|e| format!("The value for option --{} is not a timespan: {}", self.name, e)),
        }
    }
}

/// Option values visible to a backend instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOptions {
    values: BTreeMap<String, String>,
}

impl BackendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Definition settings overlaid with the target URL's query and credentials
    pub fn merged<I, K, V>(settings: I, url: &TargetUrl) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut options: Self = settings.into_iter().collect();
        if let Some(username) = url.username() {
            options.insert(AUTH_USERNAME, username);
        }
        if let Some(password) = url.password() {
            options.insert(AUTH_PASSWORD, password);
        }
        for (key, value) in url.query_pairs() {
            options.insert(key, value);
        }
        options
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Non-empty value of `name`
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// A switch given without a value counts as set
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(v) if v.trim().is_empty() => true,
            other => parse_bool(other, default),
        }
    }

    pub fn get_timespan(&self, name: &str, default: Duration) -> Result<Duration> {
        match self.get_non_empty(name) {
            None => Ok(default),
            Some(v) => parse_timespan(v).map_err(|e| {
                StratusError::Storage(StorageErrorType::ConfigError(format!("--{}: {}", name, e)))
            }),
        }
    }

    /// Enumeration value normalised to the casing of `allowed`
    pub fn get_enum(&self, name: &str, allowed: &[&str], default: &str) -> Result<String> {
        let Some(value) = self.get_non_empty(name) else {
            return Ok(default.to_string());
        };
        allowed
            .iter()
            .find(|a| a.eq_ignore_ascii_case(value.trim()))
            .map(|a| a.to_string())
            .ok_or_else(|| StratusError::Storage(StorageErrorType::ConfigError(format!(
                "--{}: \"{}\" is not one of {}", name, value, allowed.join(", ")
            ))))
    }

    pub fn get_flags(&self, name: &str, default: &str) -> Vec<String> {
        self.get_non_empty(name)
            .unwrap_or(default)
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BackendOptions {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_enumeration_ignores_case() {
        let option = OptionDescriptor::new("mode", OptionKind::Enumeration, "", "")
            .with_allowed(&["None", "Explicit"]);
        assert!(option.check_value("explicit").is_ok());
        let err = option.check_value("Sometimes").unwrap_err();
        assert!(err.contains("--mode"));
    }

    #[test]
    fn test_check_flags() {
        let option = OptionDescriptor::new("protocols", OptionKind::Flags, "", "")
            .with_allowed(&["Tls12", "Tls13"]);
        assert!(option.check_value("Tls12,tls13").is_ok());
        assert!(option.check_value("Tls12,Ssl3").unwrap_err().contains("Ssl3"));
    }

    #[test]
    fn test_check_boolean_and_timespan() {
        let flag = OptionDescriptor::new("verify", OptionKind::Boolean, "", "");
        assert!(flag.check_value("on").is_ok());
        assert!(flag.check_value("maybe").is_err());

        let delay = OptionDescriptor::new("delay", OptionKind::Timespan, "", "");
        assert!(delay.check_value("10s").is_ok());
        assert!(delay.check_value("ten").is_err());
    }

    #[test]
    fn test_url_overrides_settings() {
        let url = TargetUrl::parse("ftp://bob:pw@host/dir?ftp-upload-delay=5s").unwrap();
        let options = BackendOptions::merged(
            [("ftp-upload-delay", "1s"), ("auth-username", "alice")],
            &url,
        );
        assert_eq!(options.get("ftp-upload-delay"), Some("5s"));
        assert_eq!(options.get(AUTH_USERNAME), Some("bob"));
        assert_eq!(options.get(AUTH_PASSWORD), Some("pw"));
    }

    #[test]
    fn test_typed_getters() {
        let options: BackendOptions = [("switch", ""), ("delay", "2m"), ("mode", "pasv")]
            .into_iter()
            .collect();
        assert!(options.get_bool("switch", false));
        assert!(!options.get_bool("missing", false));
        assert_eq!(
            options.get_timespan("delay", Duration::ZERO).unwrap(),
            Duration::from_secs(120)
        );
        assert_eq!(options.get_enum("mode", &["AutoPassive", "PASV"], "AutoPassive").unwrap(), "PASV");
        assert!(options.get_enum("mode", &["EPSV"], "EPSV").is_err());
    }
}
