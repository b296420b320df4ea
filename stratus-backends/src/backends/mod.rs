//! Built-in backends

use std::sync::Arc;
use stratus_core::{Result, StorageErrorType, StratusError};
use crate::options::{OptionDescriptor, OptionKind, AUTH_PASSWORD, AUTH_USERNAME};
use crate::registry::{BackendAlias, BackendDescriptor};

pub mod file;
pub mod ftp;
pub mod s3;
pub mod ssh;
pub mod webdav;

pub fn builtin_descriptors() -> Vec<BackendDescriptor> {
    vec![
        BackendDescriptor::new(
            "file",
            "Local folder or drive",
            "Stores backup files in a local folder or a mounted network share",
            Arc::new(file::FileFactory),
        ),
        BackendDescriptor::new(
            "ftp",
            "FTP",
            "Stores backup files on an FTP server",
            Arc::new(ftp::FtpFactory),
        )
        .with_alias(BackendAlias::new(
            "aftp",
            "aftp",
            "FTP (Alternative)",
            "Stores backup files on an FTP server using the alternative option set",
        )),
        BackendDescriptor::new(
            "ssh",
            "SFTP (SSH)",
            "Stores backup files on a server reachable over SSH",
            Arc::new(ssh::SshFactory),
        )
        .with_alias(BackendAlias::new(
            "sftp",
            "sftp",
            "SFTP",
            "Stores backup files on a server reachable over SFTP",
        )),
        BackendDescriptor::new(
            "webdav",
            "WebDAV",
            "Stores backup files on a WebDAV server",
            Arc::new(webdav::WebDavFactory),
        ),
        BackendDescriptor::new(
            "s3",
            "S3 compatible",
            "Stores backup files in an S3 compatible bucket",
            Arc::new(s3::S3Factory),
        ),
    ]
}

/// The username and password options every network backend accepts
pub(crate) fn credential_options() -> Vec<OptionDescriptor> {
    vec![
        OptionDescriptor::new(
            AUTH_USERNAME,
            OptionKind::String,
            "Supplies the username used to connect to the server",
            "The username used to authenticate with the server. Can also be given in the URL.",
        ),
        OptionDescriptor::new(
            AUTH_PASSWORD,
            OptionKind::Password,
            "Supplies the password used to connect to the server",
            "The password used to authenticate with the server. Can also be given in the URL.",
        ),
    ]
}

/// Remote names are single path components
pub(crate) fn check_remote_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StratusError::Storage(StorageErrorType::ProtocolError(format!(
            "Invalid remote file name: {:?}",
            name
        ))));
    }
    Ok(())
}

pub(crate) fn config_error(message: impl Into<String>) -> StratusError {
    StratusError::Storage(StorageErrorType::ConfigError(message.into()))
}

pub(crate) fn protocol_error(message: impl Into<String>) -> StratusError {
    StratusError::Storage(StorageErrorType::ProtocolError(message.into()))
}

pub(crate) fn connection_error(message: impl Into<String>) -> StratusError {
    StratusError::Storage(StorageErrorType::ConnectionFailed(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("a.zip" ; "plain")]
    #[test_case("duplicati-20240101T000000Z.dlist.zip.aes" ; "dotted")]
    fn test_remote_name_accepted(name: &str) {
        assert!(check_remote_name(name).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case(".." ; "parent")]
    #[test_case("a/b" ; "slash")]
    #[test_case("a\\b" ; "backslash")]
    fn test_remote_name_rejected(name: &str) {
        assert!(check_remote_name(name).is_err());
    }

    #[test]
    fn test_builtin_keys_are_unique() {
        let mut keys: Vec<String> = builtin_descriptors()
            .iter()
            .flat_map(|d| d.profiles())
            .map(|p| p.protocol_key)
            .collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), total);
    }
}
