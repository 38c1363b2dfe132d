//! Directory-backed key-value store for host (development) builds.
//!
//! Each namespace is a directory and each key a file beneath it. Uses
//! `~/.teddy-auth-esp32/` by default.
//!
//! # Usage
//!
//! ```ignore
//! use teddy_auth_esp32::storage::{CredentialStore, FileStore};
//!
//! let store = FileStore::open_default()?;
//! let credentials = CredentialStore::new(Arc::new(store), mac);
//! ```

use super::{check_entry, KeyValueStore};
use crate::error::StorageError;
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Persistent store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            StorageError::Unavailable(format!("cannot create {:?}: {}", root, e))
        })?;
        debug!("File store at {:?}", root);
        Ok(Self { root })
    }

    /// Open the store at `~/.teddy-auth-esp32/`.
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(default_root().map_err(|e| StorageError::Unavailable(e.to_string()))?)
    }

    /// Directory the store lives in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(namespace).join(key)
    }
}

/// Get the default store directory.
///
/// Returns `~/.teddy-auth-esp32`
pub fn default_root() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".teddy-auth-esp32"))
}

impl KeyValueStore for FileStore {
    fn get(
        &self,
        namespace: &'static str,
        key: &'static str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(namespace, key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read {
                namespace,
                key,
                reason: e.to_string(),
            }),
        }
    }

    fn set(
        &self,
        namespace: &'static str,
        key: &'static str,
        value: &[u8],
    ) -> Result<(), StorageError> {
        check_entry(namespace, key, value)?;
        let write_err = |e: io::Error| StorageError::Write {
            namespace,
            key,
            reason: e.to_string(),
        };

        let path = self.path_for(namespace, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        // Write to a sibling file, then rename into place
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value).map_err(write_err)?;
        fs::rename(&tmp, &path).map_err(write_err)?;

        // Verify write by reading back
        let read_back = fs::read(&path).map_err(write_err)?;
        if read_back != value {
            return Err(StorageError::Write {
                namespace,
                key,
                reason: format!(
                    "verification failed: wrote {} bytes, read {} bytes",
                    value.len(),
                    read_back.len()
                ),
            });
        }
        Ok(())
    }

    fn remove(&self, namespace: &'static str, key: &'static str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(namespace, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Write {
                namespace,
                key,
                reason: e.to_string(),
            }),
        }
    }

    fn commit(&self, namespace: &'static str) -> Result<(), StorageError> {
        // Files are renamed into place on every write
        let dir = self.root.join(namespace);
        if dir.exists() {
            debug!("Committed namespace {}", namespace);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Counter to ensure unique test directories even in parallel execution
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_root() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir().join(format!("teddy-store-test-{}-{}", pid, id))
    }

    #[test]
    fn test_value_survives_reopen() {
        let root = unique_root();

        let store = FileStore::open(&root).expect("Failed to open");
        store.set("tokens", "access_token", b"tok123").unwrap();
        store.commit("tokens").unwrap();
        drop(store);

        let reopened = FileStore::open(&root).expect("Failed to reopen");
        assert_eq!(
            reopened.get("tokens", "access_token").unwrap(),
            Some(b"tok123".to_vec())
        );

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_missing_key_and_remove() {
        let root = unique_root();
        let store = FileStore::open(&root).unwrap();

        assert_eq!(store.get("credentials", "device_id").unwrap(), None);
        store.remove("credentials", "device_id").unwrap();

        store.set("credentials", "device_id", b"ABC").unwrap();
        store.remove("credentials", "device_id").unwrap();
        assert_eq!(store.get("credentials", "device_id").unwrap(), None);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let root = unique_root();
        let store = FileStore::open(&root).unwrap();

        store.set("tokens", "expiry", &1u32.to_le_bytes()).unwrap();
        store.set("tokens", "expiry", &2u32.to_le_bytes()).unwrap();
        assert_eq!(
            store.get("tokens", "expiry").unwrap(),
            Some(2u32.to_le_bytes().to_vec())
        );

        let _ = fs::remove_dir_all(&root);
    }
}
