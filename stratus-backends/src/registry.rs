//! Backend registry
//!
//! Every backend registers one descriptor. A descriptor may publish aliases: extra
//! protocol keys that resolve to the same implementation but carry their own option
//! prefix and display text, so `aftp://` reads `aftp-*` options while `ftp://`
//! reads `ftp-*` options from the same code.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use stratus_core::{Result, StratusError};
use crate::options::{BackendOptions, OptionDescriptor};
use crate::target::TargetUrl;
use crate::Backend;

/// The key, option prefix and display text a backend instance was resolved under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendProfile {
    pub protocol_key: String,
    pub option_prefix: String,
    pub display_name: String,
    pub description: String,
}

impl BackendProfile {
    /// `<prefix>-<suffix>`
    pub fn option_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.option_prefix, suffix)
    }
}

pub trait BackendFactory: Send + Sync {
    /// Options understood by the backend when resolved under `profile`
    fn supported_options(&self, profile: &BackendProfile) -> Vec<OptionDescriptor>;

    /// Build an instance. Must not perform network I/O.
    fn construct(
        &self,
        profile: &BackendProfile,
        url: &TargetUrl,
        options: &BackendOptions,
    ) -> Result<Box<dyn Backend>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAlias {
    pub key: String,
    pub option_prefix: String,
    pub display_name: String,
    pub description: String,
}

impl BackendAlias {
    pub fn new(
        key: impl Into<String>,
        option_prefix: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            option_prefix: option_prefix.into(),
            display_name: display_name.into(),
            description: description.into(),
        }
    }
}

#[derive(Clone)]
pub struct BackendDescriptor {
    pub protocol_key: String,
    pub display_name: String,
    pub description: String,
    pub option_prefix: String,
    pub aliases: Vec<BackendAlias>,
    pub factory: Arc<dyn BackendFactory>,
}

impl BackendDescriptor {
    /// Descriptor whose option prefix equals its protocol key
    pub fn new(
        protocol_key: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        let protocol_key = protocol_key.into();
        Self {
            option_prefix: protocol_key.clone(),
            protocol_key,
            display_name: display_name.into(),
            description: description.into(),
            aliases: Vec::new(),
            factory,
        }
    }

    pub fn with_option_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.option_prefix = prefix.into();
        self
    }

    pub fn with_alias(mut self, alias: BackendAlias) -> Self {
        self.aliases.push(alias);
        self
    }

    pub fn profile(&self) -> BackendProfile {
        BackendProfile {
            protocol_key: self.protocol_key.clone(),
            option_prefix: self.option_prefix.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
        }
    }

    /// Primary profile followed by one per alias
    pub fn profiles(&self) -> Vec<BackendProfile> {
        std::iter::once(self.profile())
            .chain(self.aliases.iter().map(|alias| BackendProfile {
                protocol_key: alias.key.clone(),
                option_prefix: alias.option_prefix.clone(),
                display_name: alias.display_name.clone(),
                description: alias.description.clone(),
            }))
            .collect()
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("protocol_key", &self.protocol_key)
            .field("display_name", &self.display_name)
            .field("option_prefix", &self.option_prefix)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

/// A protocol key resolved to its descriptor and profile
#[derive(Debug, Clone)]
pub struct ResolvedBackend {
    descriptor: Arc<BackendDescriptor>,
    profile: BackendProfile,
}

impl ResolvedBackend {
    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    pub fn is_alias(&self) -> bool {
        self.profile.protocol_key != self.descriptor.protocol_key
    }

    pub fn supported_options(&self) -> Vec<OptionDescriptor> {
        self.descriptor.factory.supported_options(&self.profile)
    }

    pub fn construct(&self, url: &TargetUrl, options: &BackendOptions) -> Result<Box<dyn Backend>> {
        self.descriptor.factory.construct(&self.profile, url, options)
    }
}

#[derive(Debug, Default)]
pub struct BackendRegistry {
    descriptors: Vec<Arc<BackendDescriptor>>,
    by_key: HashMap<String, ResolvedBackend>,
}

impl BackendRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in backend
    pub fn bootstrap() -> Result<Self> {
        let mut registry = Self::new();
        for descriptor in crate::backends::builtin_descriptors() {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Add a descriptor under its primary key and every alias key.
    /// Nothing is registered if any key is already taken.
    pub fn register(&mut self, descriptor: BackendDescriptor) -> Result<()> {
        let descriptor = Arc::new(descriptor);
        let profiles = descriptor.profiles();

        let mut seen = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            let key = profile.protocol_key.as_str();
            if self.by_key.contains_key(key) || seen.contains(&key) {
                return Err(StratusError::DuplicateProtocolKey(key.to_string()));
            }
            seen.push(key);
        }

        for profile in profiles {
            debug!(
                "Registered backend key '{}' ({}) with option prefix '{}'",
                profile.protocol_key, descriptor.protocol_key, profile.option_prefix
            );
            self.by_key.insert(
                profile.protocol_key.clone(),
                ResolvedBackend { descriptor: Arc::clone(&descriptor), profile },
            );
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Exact, case-sensitive lookup of a primary or alias key
    pub fn resolve(&self, key: &str) -> Result<ResolvedBackend> {
        self.by_key
            .get(key)
            .cloned()
            .ok_or_else(|| StratusError::UnknownBackend(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn construct(
        &self,
        key: &str,
        url: &TargetUrl,
        options: &BackendOptions,
    ) -> Result<Box<dyn Backend>> {
        self.resolve(key)?.construct(url, options)
    }

    /// Build the backend for a target URL, with definition settings overlaid by the URL's own options
    pub fn open<I, K, V>(&self, target_url: &str, settings: I) -> Result<Box<dyn Backend>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let url = TargetUrl::parse(target_url)?;
        let options = BackendOptions::merged(settings, &url);
        self.construct(url.protocol_key(), &url, &options)
    }

    pub fn supported_options(&self, key: &str) -> Result<Vec<OptionDescriptor>> {
        Ok(self.resolve(key)?.supported_options())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.descriptors.iter().map(|d| d.as_ref())
    }

    /// Every registered key with its profile, primary keys and aliases alike, sorted by key
    pub fn profiles(&self) -> Vec<ResolvedBackend> {
        let mut all: Vec<_> = self.by_key.values().cloned().collect();
        all.sort_by(|a, b| a.profile.protocol_key.cmp(&b.profile.protocol_key));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use tokio::io::{AsyncRead, AsyncWrite};
    use crate::options::OptionKind;
    use crate::RemoteEntry;

    #[derive(Debug)]
    struct NullBackend {
        profile: BackendProfile,
    }

    #[async_trait]
    impl Backend for NullBackend {
        fn profile(&self) -> &BackendProfile {
            &self.profile
        }

        fn supported_options(&self) -> Vec<OptionDescriptor> {
            Vec::new()
        }

        async fn list(&self) -> Result<Vec<RemoteEntry>> {
            Ok(Vec::new())
        }

        async fn put(&self, _name: &str, _source: Pin<Box<dyn AsyncRead + Send>>) -> Result<u64> {
            Ok(0)
        }

        async fn get(&self, _name: &str, _destination: Pin<Box<dyn AsyncWrite + Send>>) -> Result<u64> {
            Ok(0)
        }

        async fn delete(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        constructed: AtomicUsize,
    }

    impl BackendFactory for CountingFactory {
        fn supported_options(&self, profile: &BackendProfile) -> Vec<OptionDescriptor> {
            vec![OptionDescriptor::new(profile.option_name("mode"), OptionKind::String, "", "")]
        }

        fn construct(
            &self,
            profile: &BackendProfile,
            _url: &TargetUrl,
            _options: &BackendOptions,
        ) -> Result<Box<dyn Backend>> {
            self.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullBackend { profile: profile.clone() }))
        }
    }

    fn descriptor(key: &str, factory: Arc<CountingFactory>) -> BackendDescriptor {
        BackendDescriptor::new(key, "Null", "Discards data", factory)
    }

    #[test]
    fn test_alias_resolves_to_same_descriptor() {
        let factory = Arc::new(CountingFactory::default());
        let mut registry = BackendRegistry::new();
        registry
            .register(descriptor("null", factory).with_alias(BackendAlias::new(
                "anull", "anull", "Alternate null", "Alias of null",
            )))
            .unwrap();

        let primary = registry.resolve("null").unwrap();
        let alias = registry.resolve("anull").unwrap();
        assert!(!primary.is_alias());
        assert!(alias.is_alias());
        assert_eq!(alias.descriptor().protocol_key, "null");
        assert_eq!(alias.profile().display_name, "Alternate null");
        assert_eq!(alias.supported_options()[0].name, "anull-mode");
        assert_eq!(primary.supported_options()[0].name, "null-mode");
    }

    #[test]
    fn test_duplicate_key_registers_nothing() {
        let factory = Arc::new(CountingFactory::default());
        let mut registry = BackendRegistry::new();
        registry.register(descriptor("null", factory.clone())).unwrap();

        let clash = descriptor("other", factory)
            .with_alias(BackendAlias::new("null", "null", "Clash", ""));
        let err = registry.register(clash).unwrap_err();
        assert!(matches!(err, StratusError::DuplicateProtocolKey(ref key) if key == "null"));
        assert!(!registry.contains("other"));
        assert_eq!(registry.descriptors().count(), 1);
    }

    #[test]
    fn test_unknown_and_case_sensitive_lookup() {
        let mut registry = BackendRegistry::new();
        registry.register(descriptor("null", Arc::default())).unwrap();
        assert!(matches!(registry.resolve("NULL"), Err(StratusError::UnknownBackend(_))));
        assert!(matches!(registry.supported_options("gopher"), Err(StratusError::UnknownBackend(_))));
    }

    #[test]
    fn test_options_without_construction() {
        let factory = Arc::new(CountingFactory::default());
        let mut registry = BackendRegistry::new();
        registry.register(descriptor("null", factory.clone())).unwrap();

        registry.supported_options("null").unwrap();
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 0);

        let backend = registry.open("null://host/dir", Vec::<(String, String)>::new()).unwrap();
        assert_eq!(backend.profile().protocol_key, "null");
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bootstrap_contains_builtin_keys() {
        let registry = BackendRegistry::bootstrap().unwrap();
        for key in ["file", "ftp", "aftp", "ssh", "sftp", "webdav", "s3"] {
            assert!(registry.contains(key), "missing {}", key);
        }
        assert_eq!(registry.resolve("aftp").unwrap().descriptor().protocol_key, "ftp");
    }
}
