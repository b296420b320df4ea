use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StratusError {
    /// User-fixable problem with a definition: bad option, unknown protocol, malformed filter
    #[error("{0}")]
    Validation(String),
    #[error("There already exists a backup with the name: {0}")]
    NameConflict(String),
    #[error("The value is encrypted with a different settings encryption key")]
    KeyMismatch,
    #[error("No backup found in document")]
    MissingBackup,
    #[error("Malformed backup bundle: {0}")]
    MalformedBundle(String),
    #[error("Unknown backend protocol: {0}")]
    UnknownBackend(String),
    #[error("Protocol key already registered: {0}")]
    DuplicateProtocolKey(String),
    #[error("No backup with ID {0}")]
    BackupNotFound(String),
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("Encryption error: {0}")]
    Encryption(String),
    #[error("Storage error: {0}")]
    Storage(StorageErrorType),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("General error: {0}")]
    Other(String),
}

impl StratusError {
    /// True for errors a caller can fix by changing the submitted definition
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StratusError::Validation(_)
                | StratusError::NameConflict(_)
                | StratusError::MissingBackup
                | StratusError::MalformedBundle(_)
                | StratusError::UnknownBackend(_)
                | StratusError::KeyMismatch
        )
    }
}

impl From<aes_gcm::Error> for StratusError {
    fn from(err: aes_gcm::Error) -> Self {
        StratusError::Encryption(format!("AES encryption error: {}", err))
    }
}

impl From<argon2::Error> for StratusError {
    fn from(err: argon2::Error) -> Self {
        StratusError::Encryption(format!("Key derivation failed: {}", err))
    }
}

impl From<StorageErrorType> for StratusError {
    fn from(err: StorageErrorType) -> Self {
        StratusError::Storage(err)
    }
}

pub type Result<T> = std::result::Result<T, StratusError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StorageErrorType {
    PathNotFound,
    PermissionDenied,
    WriteError,
    ReadError,
    DeleteError,
    QuotaExceeded,
    AccessDenied,
    FileNotFound,
    IOError(String),
    AuthenticationFailed,
    ConnectionFailed(String),
    ProtocolError(String),
    /// Configuration error for storage provider
    ConfigError(String),
}

impl std::fmt::Display for StorageErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageErrorType::PathNotFound => write!(f, "Path not found"),
            StorageErrorType::PermissionDenied => write!(f, "Permission denied"),
            StorageErrorType::WriteError => write!(f, "Write error"),
            StorageErrorType::ReadError => write!(f, "Read error"),
            StorageErrorType::DeleteError => write!(f, "Delete error"),
            StorageErrorType::QuotaExceeded => write!(f, "Quota exceeded"),
            StorageErrorType::AccessDenied => write!(f, "Access denied"),
            StorageErrorType::FileNotFound => write!(f, "File not found"),
            StorageErrorType::IOError(msg) => write!(f, "IO error: {}", msg),
            StorageErrorType::AuthenticationFailed => write!(f, "Authentication failed"),
            StorageErrorType::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            StorageErrorType::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
            StorageErrorType::ConfigError(msg) => write!(f, "Storage configuration error: {}", msg),
        }
    }
}
