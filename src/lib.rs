//! Teddy device identity and authentication core.
//!
//! Everything except the NVS backend, the NimBLE GATT service and the
//! ESP-IDF HTTP client is platform independent and tested on the host.
//!
//! ```text
//! BLE provisioning ─▶ CredentialStore ─▶ (WiFi up) ─▶ ClaimClient ─▶ TokenManager ─▶ refresh channel
//! ```

pub mod claim;
pub mod config;
pub mod error;
pub mod identity;
pub mod provisioning;
pub mod storage;
pub mod token;

pub use claim::{ClaimClient, ClaimHttp, ClaimResponse};
pub use config::{AuthConfig, WifiConfig};
pub use error::{Error, Result, StorageError, TransportError, ValidationError};
pub use identity::{MacAddress, OobSecret};
pub use provisioning::{ProvisioningData, ProvisioningSession, StatusReply};
pub use storage::{CredentialStore, KeyValueStore, MemoryStore};
pub use token::{AuthEvent, RefreshChannel, TokenManager};

#[cfg(feature = "esp32")]
use esp_idf_svc::nvs::EspDefaultNvsPartition;

/// The default NVS partition, taken once and shared by every user.
#[cfg(feature = "esp32")]
pub fn nvs_default_partition() -> std::result::Result<EspDefaultNvsPartition, esp_idf_sys::EspError> {
    use std::sync::Mutex;

    static PARTITION: Mutex<Option<EspDefaultNvsPartition>> = Mutex::new(None);

    let mut slot = PARTITION.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(partition) = slot.as_ref() {
        return Ok(partition.clone());
    }
    let partition = EspDefaultNvsPartition::take()?;
    *slot = Some(partition.clone());
    Ok(partition)
}
