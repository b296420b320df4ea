//! Hashing and authenticated encryption used by the field envelope and export bundles
//!
//! Every sealed buffer is laid out as `[16-byte salt][12-byte nonce][ciphertext + tag]`.
//! The AES-256-GCM key is derived from the caller's secret with Argon2id using the
//! embedded salt, so the same secret can open the buffer on any machine.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;
use crate::error::{Result, StratusError};

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Length of a SHA-256 digest rendered as lowercase hex
pub const HASH_HEX_LEN: usize = 64;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfCost {
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfCost {
    /// Used per configuration field. Field keys are machine-derived or operator supplied,
    /// and a definition can carry several secrets, so the cost stays low.
    pub const FIELD: KdfCost = KdfCost { memory_kib: 4096, iterations: 3, parallelism: 1 };

    /// Used for passphrase-sealed export bundles (RFC 9106 second recommended option)
    pub const BUNDLE: KdfCost = KdfCost { memory_kib: 65536, iterations: 3, parallelism: 1 };
}

/// SHA-256 of `data` as lowercase hex
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

fn derive_cipher(secret: &[u8], salt: &[u8], cost: KdfCost) -> Result<Aes256Gcm> {
    let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, Some(32))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key_bytes = Zeroizing::new([0u8; 32]);
    argon2.hash_password_into(secret, salt, &mut *key_bytes)?;

    Aes256Gcm::new_from_slice(&*key_bytes)
        .map_err(|e| StratusError::Encryption(format!("Failed to create cipher: {}", e)))
}

/// Encrypt `plaintext` under a key derived from `secret`
pub fn seal(secret: &[u8], plaintext: &[u8], cost: KdfCost) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = derive_cipher(secret, &salt, cost)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| StratusError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Reverse of [`seal`]. Fails on a wrong secret or any modification of the buffer.
pub fn open(secret: &[u8], sealed: &[u8], cost: KdfCost) -> Result<Vec<u8>> {
    if sealed.len() < SALT_LEN + NONCE_LEN {
        return Err(StratusError::Encryption(
            "Ciphertext too short (missing salt or nonce)".to_string(),
        ));
    }

    let (salt, rest) = sealed.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let cipher = derive_cipher(secret, salt, cost)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| StratusError::Encryption(
            format!("Decryption failed (wrong key or corrupted data): {}", e)
        ))
}

/// Encrypt a string field and render the sealed buffer as hex
pub fn encrypt_to_hex(secret: &str, plaintext: &str) -> Result<String> {
    let sealed = seal(secret.as_bytes(), plaintext.as_bytes(), KdfCost::FIELD)?;
    Ok(hex::encode(sealed))
}

pub fn decrypt_from_hex(secret: &str, ciphertext_hex: &str) -> Result<String> {
    let sealed = hex::decode(ciphertext_hex)
        .map_err(|e| StratusError::Encryption(format!("Ciphertext is not valid hex: {}", e)))?;
    let plaintext = open(secret.as_bytes(), &sealed, KdfCost::FIELD)?;
    String::from_utf8(plaintext)
        .map_err(|e| StratusError::Encryption(format!("Decrypted value is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha256_hex("").len(), HASH_HEX_LEN);
    }

    #[test]
    fn test_hex_roundtrip() {
        let encrypted = encrypt_to_hex("password-1", "secret value").unwrap();
        assert!(encrypted.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(decrypt_from_hex("password-1", &encrypted).unwrap(), "secret value");
    }

    #[test]
    fn test_salt_and_nonce_differ_per_call() {
        let a = encrypt_to_hex("password-1", "same").unwrap();
        let b = encrypt_to_hex("password-1", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let encrypted = encrypt_to_hex("password-1", "secret value").unwrap();
        assert!(decrypt_from_hex("password-2", &encrypted).is_err());
    }

    #[test]
    fn test_truncated_buffer_rejected() {
        let err = open(b"password-1", &[0u8; 10], KdfCost::FIELD).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }
}
