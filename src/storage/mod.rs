//! Reboot-durable key-value storage for identity secrets.
//!
//! # Components
//!
//! - [`KeyValueStore`] - namespaced byte store implemented per platform
//! - [`MemoryStore`] - volatile backend for tests and ephemeral sessions
//! - [`FileStore`] - directory-backed backend for host builds
//! - `NvsStore` - ESP32 Non-Volatile Storage backend (`esp32` feature)
//! - [`CredentialStore`] - typed accessors for secrets, IDs and tokens
//!
//! # Layout
//!
//! | Namespace | Keys |
//! |-----------|------|
//! | `credentials` | `device_id`, `oob_secret`, `pairing_code`, `prov_payload`, `child_id`, `child_age`, `device_config` |
//! | `tokens` | `access_token`, `refresh_token`, `expiry`, `device_id`, `child_id` |
//! | `wifi_config` | `credentials` |
//!
//! NVS limits keys to 15 characters, which is why the provisioning payload is
//! stored under `prov_payload`.

mod credentials;
mod memory;

#[cfg(not(target_os = "espidf"))]
mod file;

#[cfg(feature = "esp32")]
mod nvs;

pub use credentials::CredentialStore;
pub use memory::MemoryStore;

#[cfg(not(target_os = "espidf"))]
pub use file::FileStore;

#[cfg(feature = "esp32")]
pub use nvs::NvsStore;

use crate::error::StorageError;

/// Namespace holding the device's identity secrets.
pub const NS_CREDENTIALS: &str = "credentials";
/// Namespace holding the token pair and its metadata.
pub const NS_TOKENS: &str = "tokens";
/// Namespace holding WiFi credentials.
pub const NS_WIFI: &str = "wifi_config";

pub const KEY_DEVICE_ID: &str = "device_id";
pub const KEY_OOB_SECRET: &str = "oob_secret";
pub const KEY_PAIRING_CODE: &str = "pairing_code";
pub const KEY_PROVISIONING_PAYLOAD: &str = "prov_payload";
pub const KEY_CHILD_ID: &str = "child_id";
pub const KEY_CHILD_AGE: &str = "child_age";
pub const KEY_DEVICE_CONFIG: &str = "device_config";
pub const KEY_ACCESS_TOKEN: &str = "access_token";
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub const KEY_EXPIRY: &str = "expiry";
pub const KEY_WIFI_CREDENTIALS: &str = "credentials";

/// Longest key any backend must accept.
pub const MAX_KEY_LEN: usize = 15;

/// Largest value stored under a single key.
pub const MAX_VALUE_LEN: usize = 4000;

/// Namespaced byte storage.
///
/// Writes become durable at the latest on [`commit`](Self::commit); backends
/// that persist each write immediately treat `commit` as a no-op. A group of
/// related writes followed by one commit is the unit of (best-effort)
/// atomicity.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. `Ok(None)` means the key is absent.
    fn get(&self, namespace: &'static str, key: &'static str)
        -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a value.
    fn set(&self, namespace: &'static str, key: &'static str, value: &[u8])
        -> Result<(), StorageError>;

    /// Delete a value. Removing an absent key succeeds.
    fn remove(&self, namespace: &'static str, key: &'static str) -> Result<(), StorageError>;

    /// Flush pending writes of a namespace.
    fn commit(&self, namespace: &'static str) -> Result<(), StorageError>;
}

/// Reject keys or values a backend could not store.
pub(crate) fn check_entry(
    namespace: &'static str,
    key: &'static str,
    value: &[u8],
) -> Result<(), StorageError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StorageError::Write {
            namespace,
            key,
            reason: format!("key length {} outside 1..={}", key.len(), MAX_KEY_LEN),
        });
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(StorageError::Write {
            namespace,
            key,
            reason: format!("value length {} exceeds {}", value.len(), MAX_VALUE_LEN),
        });
    }
    Ok(())
}
