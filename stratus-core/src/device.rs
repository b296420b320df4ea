//! Stable per-device identifier used as the fallback settings encryption key

use tracing::warn;
use crate::crypto::sha256_hex;

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Hash of whatever identifies this machine: machine-id, hostname and OS type.
///
/// The value must not change between runs, otherwise settings encrypted with the
/// default key become unreadable.
pub fn device_id_hash() -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(machine_id) = MACHINE_ID_PATHS
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    {
        parts.push(machine_id);
    }

    if let Ok(hostname) = sys_info::hostname() {
        parts.push(hostname);
    }
    if let Ok(os_type) = sys_info::os_type() {
        parts.push(os_type);
    }

    if parts.is_empty() {
        warn!("No device identity available, falling back to a fixed device key");
        parts.push("stratus-unidentified-device".to_string());
    }

    sha256_hex(format!("stratus-device:{}", parts.join("|")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_is_stable() {
        let first = device_id_hash();
        assert_eq!(first, device_id_hash());
        assert_eq!(first.len(), 64);
    }
}
