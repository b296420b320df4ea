//! Parsed backup target URLs
//!
//! The scheme of a target URL is the backend protocol key, taken verbatim from the
//! input so that lookups stay case-sensitive.

use std::fmt;
use url::Url;
use stratus_core::{Result, StratusError};

#[derive(Clone, PartialEq, Eq)]
pub struct TargetUrl {
    scheme: String,
    url: Url,
}

impl TargetUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let scheme = match raw.split_once("://") {
            Some((scheme, _)) if !scheme.is_empty() => scheme.to_string(),
            _ => {
                return Err(StratusError::Validation(format!(
                    "Invalid target URL, expected <protocol>://...: {}",
                    redact(raw)
                )))
            }
        };

        let url = Url::parse(raw).map_err(|e| {
            StratusError::Validation(format!("Invalid target URL {}: {}", redact(raw), e))
        })?;

        Ok(Self { scheme, url })
    }

    /// The scheme as written, used as the backend protocol key
    pub fn protocol_key(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Percent-decoded path, always starting with `/` when non-empty
    pub fn path(&self) -> String {
        decode(self.url.path())
    }

    /// Path without leading or trailing slashes
    pub fn trimmed_path(&self) -> String {
        self.path().trim_matches('/').to_string()
    }

    pub fn username(&self) -> Option<String> {
        Some(self.url.username())
            .filter(|u| !u.is_empty())
            .map(decode)
    }

    pub fn password(&self) -> Option<String> {
        self.url.password().map(decode)
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Same URL with its query replaced by `pairs`
    pub fn with_query(&self, pairs: &[(String, String)]) -> String {
        let mut url = self.url.clone();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs.iter());
        }
        self.restore_scheme(url.as_str())
    }

    /// Same URL with the userinfo password removed
    pub fn without_password(&self) -> TargetUrl {
        let mut url = self.url.clone();
        let _ = url.set_password(None);
        TargetUrl { scheme: self.scheme.clone(), url }
    }

    /// The URL without password and query, safe to log or to key a database on
    pub fn without_credentials(&self) -> String {
        let mut url = self.url.clone();
        let _ = url.set_password(None);
        url.set_query(None);
        url.set_fragment(None);
        self.restore_scheme(url.as_str())
    }

    fn restore_scheme(&self, serialized: &str) -> String {
        match serialized.split_once(':') {
            Some((_, rest)) => format!("{}:{}", self.scheme, rest),
            None => serialized.to_string(),
        }
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.without_credentials())
    }
}

impl fmt::Debug for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TargetUrl").field(&self.without_credentials()).finish()
    }
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Drop anything after the authority so error messages never echo secrets
fn redact(raw: &str) -> String {
    match raw.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split(['/', '?']).next().unwrap_or_default();
            let host = host.rsplit('@').next().unwrap_or_default();
            format!("{}://{}", scheme, host)
        }
        None => "<unparsable>".to_string(),
    }
}
