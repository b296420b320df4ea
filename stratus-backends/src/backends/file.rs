//! Local folder backend

use std::path::{Path, PathBuf};
use std::pin::Pin;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use stratus_core::{Result, StorageErrorType, StratusError};
use crate::backends::{check_remote_name, config_error};
use crate::options::{BackendOptions, OptionDescriptor, OptionKind};
use crate::registry::{BackendFactory, BackendProfile};
use crate::target::TargetUrl;
use crate::{Backend, RemoteEntry};

const ALTERNATE_TARGETS: &str = "alternate-target-paths";
const DESTINATION_MARKER: &str = "alternate-destination-marker";

pub struct FileFactory;

impl BackendFactory for FileFactory {
    fn supported_options(&self, _profile: &BackendProfile) -> Vec<OptionDescriptor> {
        file_options()
    }

    fn construct(
        &self,
        profile: &BackendProfile,
        url: &TargetUrl,
        options: &BackendOptions,
    ) -> Result<Box<dyn Backend>> {
        let primary = target_path(url);
        if primary.as_os_str().is_empty() {
            return Err(config_error("The file backend needs a folder path"));
        }

        let alternates = options
            .get_non_empty(ALTERNATE_TARGETS)
            .map(|paths| {
                std::env::split_paths(paths)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::new(FileBackend {
            profile: profile.clone(),
            primary,
            alternates,
            marker: options.get_non_empty(DESTINATION_MARKER).map(str::to_string),
        }))
    }
}

fn file_options() -> Vec<OptionDescriptor> {
    vec![
        OptionDescriptor::new(
            ALTERNATE_TARGETS,
            OptionKind::String,
            "Fallback target folders",
            "A list of folders, separated by the platform path separator, tried in order \
             when the target folder is missing or lacks the destination marker.",
        ),
        OptionDescriptor::new(
            DESTINATION_MARKER,
            OptionKind::String,
            "File that marks the right destination",
            "When set, the backup goes to the first candidate folder that contains a file \
             with this name. Useful for removable drives that change mount points.",
        ),
    ]
}

/// Accepts `file:///abs/path` and `file://relative/path`
fn target_path(url: &TargetUrl) -> PathBuf {
    match url.host() {
        Some(host) => PathBuf::from(format!("{}{}", host, url.path())),
        None => PathBuf::from(url.path()),
    }
}

#[derive(Debug)]
pub struct FileBackend {
    profile: BackendProfile,
    primary: PathBuf,
    alternates: Vec<PathBuf>,
    marker: Option<String>,
}

impl FileBackend {
    /// The folder the backup currently goes to
    pub async fn root(&self) -> Result<PathBuf> {
        let candidates = std::iter::once(&self.primary).chain(self.alternates.iter());

        for candidate in candidates {
            let usable = match &self.marker {
                Some(marker) => fs::try_exists(candidate.join(marker)).await.unwrap_or(false),
                None => fs::try_exists(candidate).await.unwrap_or(false),
            };
            if usable {
                if candidate != &self.primary {
                    info!("Using alternate target folder {}", candidate.display());
                }
                return Ok(candidate.clone());
            }
        }

        match &self.marker {
            Some(marker) => Err(StratusError::Storage(StorageErrorType::ConfigError(format!(
                "No target folder contains the destination marker {}",
                marker
            )))),
            None => Ok(self.primary.clone()),
        }
    }

    async fn resolve(&self, remote_name: &str) -> Result<PathBuf> {
        check_remote_name(remote_name)?;
        Ok(self.root().await?.join(remote_name))
    }
}

fn not_found(path: &Path) -> StratusError {
    StratusError::Storage(StorageErrorType::IOError(format!("Folder not found: {}", path.display())))
}

#[async_trait]
impl Backend for FileBackend {
    fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    fn supported_options(&self) -> Vec<OptionDescriptor> {
        file_options()
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let root = self.root().await?;
        if !fs::try_exists(&root).await? {
            return Err(not_found(&root));
        }

        let mut items = Vec::new();
        for entry in walkdir::WalkDir::new(&root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                StratusError::Storage(StorageErrorType::IOError(format!("Directory walking error: {}", e)))
            })?;
            let metadata = fs::metadata(entry.path()).await?;
            items.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.is_file().then(|| metadata.len()),
                last_modified: metadata.modified().ok().map(Into::into),
                is_folder: metadata.is_dir(),
            });
        }

        debug!("Listed {} entries in {}", items.len(), root.display());
        Ok(items)
    }

    async fn put(&self, remote_name: &str, mut source: Pin<Box<dyn AsyncRead + Send>>) -> Result<u64> {
        let path = self.resolve(remote_name).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        let written = tokio::io::copy(&mut source, &mut file).await?;
        file.flush().await?;
        Ok(written)
    }

    async fn get(&self, remote_name: &str, mut destination: Pin<Box<dyn AsyncWrite + Send>>) -> Result<u64> {
        let path = self.resolve(remote_name).await?;
        let mut file = fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StratusError::Storage(StorageErrorType::FileNotFound),
            _ => StratusError::Io(e),
        })?;
        let read = tokio::io::copy(&mut file, &mut destination).await?;
        destination.flush().await?;
        Ok(read)
    }

    async fn delete(&self, remote_name: &str) -> Result<()> {
        let path = self.resolve(remote_name).await?;
        fs::remove_file(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StratusError::Storage(StorageErrorType::FileNotFound),
            _ => StratusError::Io(e),
        })
    }

    async fn test(&self) -> Result<()> {
        let root = self.root().await?;
        if fs::try_exists(&root).await? {
            Ok(())
        } else {
            Err(not_found(&root))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;
    use crate::registry::BackendRegistry;

    fn open(url: &str, settings: &[(&str, &str)]) -> Box<dyn Backend> {
        BackendRegistry::bootstrap()
            .unwrap()
            .open(url, settings.iter().copied())
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_list_get_delete() {
        let dir = TempDir::new().unwrap();
        let backend = open(&format!("file://{}", dir.path().display()), &[]);

        let written = backend
            .put("volume.zip", Box::pin(Cursor::new(b"backup data".to_vec())))
            .await
            .unwrap();
        assert_eq!(written, 11);

        let entries = backend.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "volume.zip");
        assert_eq!(entries[0].size, Some(11));

        let restore = TempDir::new().unwrap();
        let restored = restore.path().join("volume.zip");
        let out = tokio::fs::File::create(&restored).await.unwrap();
        backend.get("volume.zip", Box::pin(out)).await.unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), b"backup data");

        backend.delete("volume.zip").await.unwrap();
        assert!(backend.list().await.unwrap().is_empty());
        assert!(backend.delete("volume.zip").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let backend = open(&format!("file://{}", dir.path().display()), &[]);
        let result = backend.put("../escape", Box::pin(Cursor::new(Vec::new()))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_marker_selects_alternate() {
        let primary = TempDir::new().unwrap();
        let alternate = TempDir::new().unwrap();
        std::fs::write(alternate.path().join("DEST"), b"").unwrap();

        let alternates = alternate.path().display().to_string();
        let backend = open(
            &format!("file://{}", primary.path().display()),
            &[(ALTERNATE_TARGETS, alternates.as_str()), (DESTINATION_MARKER, "DEST")],
        );

        backend.put("a.bin", Box::pin(Cursor::new(vec![1, 2, 3]))).await.unwrap();
        assert!(alternate.path().join("a.bin").exists());
        assert!(!primary.path().join("a.bin").exists());
    }

    #[tokio::test]
    async fn test_missing_folder_fails_test() {
        let dir = TempDir::new().unwrap();
        let backend = open(&format!("file://{}/missing", dir.path().display()), &[]);
        assert!(backend.test().await.is_err());
    }
}
