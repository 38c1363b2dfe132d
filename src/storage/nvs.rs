//! ESP32 Non-Volatile Storage backend.
//!
//! Opens one `EspNvs` handle per namespace over the shared default partition.
//! Every write is read back and compared, which catches flash write failures
//! that do not surface as an error code.
//!
//! # Security
//!
//! Production images should enable NVS encryption; development builds store
//! the OOB secret and tokens in plain flash.

use super::{check_entry, KeyValueStore, MAX_VALUE_LEN};
use crate::error::StorageError;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::{debug, error};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// NVS-backed store.
pub struct NvsStore {
    partition: EspDefaultNvsPartition,
    handles: Mutex<HashMap<&'static str, EspNvs<NvsDefault>>>,
}

impl NvsStore {
    /// Open the store over the shared default NVS partition.
    ///
    /// Fails closed if the partition cannot be taken; the caller must not
    /// fall back to volatile storage for identity secrets.
    pub fn open() -> Result<Self, StorageError> {
        let partition = crate::nvs_default_partition()
            .map_err(|e| StorageError::Unavailable(format!("NVS partition: {:?}", e)))?;
        Ok(Self {
            partition,
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<&'static str, EspNvs<NvsDefault>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` with the handle for `namespace`, opening it on first use.
    fn with_handle<R>(
        &self,
        namespace: &'static str,
        f: impl FnOnce(&mut EspNvs<NvsDefault>) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let mut handles = self.lock();
        if !handles.contains_key(namespace) {
            let nvs = EspNvs::new(self.partition.clone(), namespace, true).map_err(|e| {
                StorageError::Unavailable(format!("open namespace {}: {:?}", namespace, e))
            })?;
            debug!("Opened NVS namespace {}", namespace);
            handles.insert(namespace, nvs);
        }
        match handles.get_mut(namespace) {
            Some(nvs) => f(nvs),
            None => Err(StorageError::Unavailable(namespace.to_string())),
        }
    }
}

impl KeyValueStore for NvsStore {
    fn get(
        &self,
        namespace: &'static str,
        key: &'static str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.with_handle(namespace, |nvs| {
            let read_err = |e: esp_idf_sys::EspError| StorageError::Read {
                namespace,
                key,
                reason: format!("{:?}", e),
            };

            let len = match nvs.blob_len(key).map_err(read_err)? {
                Some(len) => len,
                None => return Ok(None),
            };
            if len > MAX_VALUE_LEN {
                error!("NVS value {}/{} is {} bytes, refusing to read", namespace, key, len);
                return Err(StorageError::Corrupt { namespace, key });
            }

            let mut buf = vec![0u8; len];
            let bytes = nvs.get_raw(key, &mut buf).map_err(read_err)?;
            Ok(bytes.map(|b| b.to_vec()))
        })
    }

    fn set(
        &self,
        namespace: &'static str,
        key: &'static str,
        value: &[u8],
    ) -> Result<(), StorageError> {
        check_entry(namespace, key, value)?;
        self.with_handle(namespace, |nvs| {
            let write_err = |e: esp_idf_sys::EspError| StorageError::Write {
                namespace,
                key,
                reason: format!("{:?}", e),
            };

            nvs.set_raw(key, value).map_err(write_err)?;

            // Read back and verify to catch silent flash write failures
            let mut verify_buf = vec![0u8; value.len()];
            let read_back = nvs.get_raw(key, &mut verify_buf).map_err(write_err)?;
            if read_back != Some(value) {
                error!("NVS verification failed for {}/{}", namespace, key);
                return Err(StorageError::Write {
                    namespace,
                    key,
                    reason: "data mismatch after save".into(),
                });
            }
            Ok(())
        })
    }

    fn remove(&self, namespace: &'static str, key: &'static str) -> Result<(), StorageError> {
        self.with_handle(namespace, |nvs| {
            nvs.remove(key).map_err(|e| StorageError::Write {
                namespace,
                key,
                reason: format!("{:?}", e),
            })?;
            Ok(())
        })
    }

    fn commit(&self, _namespace: &'static str) -> Result<(), StorageError> {
        // EspNvs commits inside every set_raw/remove
        Ok(())
    }
}
