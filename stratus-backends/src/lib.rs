//! Storage backends for backup targets and the registry that resolves them by protocol key

use std::pin::Pin;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use stratus_core::Result;

pub mod backends;
pub mod options;
pub mod registry;
pub mod target;

pub use options::{BackendOptions, OptionDescriptor, OptionKind};
pub use registry::{
    BackendAlias, BackendDescriptor, BackendFactory, BackendProfile, BackendRegistry, ResolvedBackend,
};
pub use target::TargetUrl;

/// A file or folder in a backend's target folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_folder: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size: Some(size),
            last_modified: None,
            is_folder: false,
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// The profile this instance was constructed under
    fn profile(&self) -> &BackendProfile;

    fn protocol_key(&self) -> &str {
        &self.profile().protocol_key
    }

    fn display_name(&self) -> &str {
        &self.profile().display_name
    }

    fn supported_options(&self) -> Vec<OptionDescriptor>;

    /// Entries directly inside the target folder
    async fn list(&self) -> Result<Vec<RemoteEntry>>;

    /// Upload `source` as `remote_name`, returning the number of bytes written
    async fn put(&self, remote_name: &str, source: Pin<Box<dyn AsyncRead + Send>>) -> Result<u64>;

    /// Download `remote_name` into `destination`, returning the number of bytes read
    async fn get(&self, remote_name: &str, destination: Pin<Box<dyn AsyncWrite + Send>>) -> Result<u64>;

    async fn delete(&self, remote_name: &str) -> Result<()>;

    /// Check that the target is reachable and the credentials work
    async fn test(&self) -> Result<()> {
        self.list().await.map(|_| ())
    }
}
