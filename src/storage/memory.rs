//! Volatile key-value backend.

use super::{check_entry, KeyValueStore};
use crate::error::StorageError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

type Entries = HashMap<(&'static str, &'static str), Vec<u8>>;

/// In-memory store. Contents are lost when dropped.
///
/// Write failures can be injected to exercise storage-error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove`/`commit` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `get` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of stored keys across all namespaces.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(&self, namespace: &'static str, key: &'static str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write {
                namespace,
                key,
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(
        &self,
        namespace: &'static str,
        key: &'static str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Read {
                namespace,
                key,
                reason: "injected failure".into(),
            });
        }
        Ok(self.lock().get(&(namespace, key)).cloned())
    }

    fn set(
        &self,
        namespace: &'static str,
        key: &'static str,
        value: &[u8],
    ) -> Result<(), StorageError> {
        self.write_guard(namespace, key)?;
        check_entry(namespace, key, value)?;
        self.lock().insert((namespace, key), value.to_vec());
        Ok(())
    }

    fn remove(&self, namespace: &'static str, key: &'static str) -> Result<(), StorageError> {
        self.write_guard(namespace, key)?;
        self.lock().remove(&(namespace, key));
        Ok(())
    }

    fn commit(&self, namespace: &'static str) -> Result<(), StorageError> {
        self.write_guard(namespace, "*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("ns", "k").unwrap(), None);

        store.set("ns", "k", b"value").unwrap();
        assert_eq!(store.get("ns", "k").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.get("other", "k").unwrap(), None);

        store.remove("ns", "k").unwrap();
        assert_eq!(store.get("ns", "k").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_injected_failures() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.set("ns", "k", b"v"),
            Err(StorageError::Write { .. })
        ));
        assert!(store.commit("ns").is_err());

        store.set_fail_writes(false);
        store.set_fail_reads(true);
        assert!(matches!(store.get("ns", "k"), Err(StorageError::Read { .. })));
    }

    #[test]
    fn test_rejects_long_key() {
        let store = MemoryStore::new();
        assert!(store.set("ns", "provisioning_payload", b"v").is_err());
    }
}
