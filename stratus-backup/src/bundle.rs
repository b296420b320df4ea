//! Export bundle codec
//!
//! A bundle is pretty-printed JSON, optionally sealed with a passphrase:
//! `b"AES"`, version byte, then Argon2id salt, AES-GCM nonce and ciphertext.

use stratus_core::crypto::primitives::{self, KdfCost};
use stratus_core::{ImportExportBundle, Result, StratusError};

pub const MAGIC: &[u8; 3] = b"AES";
pub const VERSION: u8 = 0x02;

/// Whether `data` starts with the sealed-bundle magic
pub fn is_sealed(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

pub fn encode(bundle: &ImportExportBundle) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(bundle)?)
}

pub fn decode(json: &[u8]) -> Result<ImportExportBundle> {
    serde_json::from_slice(json).map_err(|e| StratusError::MalformedBundle(e.to_string()))
}

pub fn seal(json: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(StratusError::Encryption("An empty passphrase cannot seal a bundle".to_string()));
    }

    let sealed = primitives::seal(passphrase.as_bytes(), json, KdfCost::BUNDLE)?;
    let mut out = Vec::with_capacity(MAGIC.len() + 1 + sealed.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn open(data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(StratusError::Encryption("A passphrase is required to open this bundle".to_string()));
    }

    let body = data
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| StratusError::MalformedBundle("missing AES header".to_string()))?;
    let (version, sealed) = body
        .split_first()
        .ok_or_else(|| StratusError::MalformedBundle("truncated AES header".to_string()))?;
    if *version != VERSION {
        return Err(StratusError::MalformedBundle(format!("unsupported container version {}", version)));
    }

    primitives::open(passphrase.as_bytes(), sealed, KdfCost::BUNDLE).map_err(|_| {
        StratusError::Encryption("wrong passphrase or corrupted bundle".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::BackupDefinition;

    #[test]
    fn test_seal_and_open() {
        let bundle = ImportExportBundle {
            backup: Some(BackupDefinition::new("Nightly", "file:///srv/backup")),
            schedule: None,
        };
        let json = encode(&bundle).unwrap();
        let sealed = seal(&json, "correct horse").unwrap();

        assert!(is_sealed(&sealed));
        assert_eq!(sealed[3], VERSION);
        assert!(!sealed.windows(7).any(|w| w == b"Nightly"));
        assert_eq!(decode(&open(&sealed, "correct horse").unwrap()).unwrap(), bundle);
    }

    #[test]
    fn test_wrong_passphrase() {
        let sealed = seal(b"{}", "right").unwrap();
        let err = open(&sealed, "wrong").unwrap_err();
        assert!(matches!(err, StratusError::Encryption(ref m) if m.contains("wrong passphrase")));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(matches!(seal(b"{}", ""), Err(StratusError::Encryption(_))));
    }

    #[test]
    fn test_plain_json_is_not_sealed() {
        assert!(!is_sealed(b"{\"Backup\": null}"));
        assert!(matches!(decode(b"not json"), Err(StratusError::MalformedBundle(_))));
    }

    #[test]
    fn test_unknown_version() {
        let mut sealed = seal(b"{}", "pw").unwrap();
        sealed[3] = 0x01;
        assert!(matches!(open(&sealed, "pw"), Err(StratusError::MalformedBundle(_))));
    }
}
