//! Typed access to the device's identity secrets.
//!
//! `CredentialStore` is the only writer of the `credentials`, `tokens` and
//! `wifi_config` namespaces. Related keys are written as a group and then
//! committed once; a power cut between two writes of a group can leave the
//! group half-written, which every loader tolerates.

use super::*;
use crate::config::WifiConfig;
use crate::error::StorageError;
use crate::identity::{self, validate_device_id, MacAddress, OobSecret};
use crate::provisioning::ProvisioningData;
use crate::token::record::{decode_expiry, encode_expiry};
use crate::token::TokenRecord;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{info, warn};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Secure credential store over a platform key-value backend.
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KeyValueStore>,
    mac: MacAddress,
}

impl CredentialStore {
    /// Create a store. `mac` is the radio MAC the device ID is derived from.
    pub fn new(kv: Arc<dyn KeyValueStore>, mac: MacAddress) -> Self {
        Self { kv, mac }
    }

    /// Radio MAC this store derives identity from.
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// Derive the OOB secret for `device_id`. Pure; touches no storage.
    pub fn generate_oob_secret(device_id: &str) -> OobSecret {
        identity::generate_oob_secret(device_id)
    }

    // --- identity ---

    /// Stored device ID, or the canonical MAC-derived ID persisted on first use.
    pub fn load_device_id(&self) -> Result<String, StorageError> {
        if let Some(id) = self.get_string(NS_CREDENTIALS, KEY_DEVICE_ID)? {
            if validate_device_id(&id).is_err() {
                return Err(StorageError::Corrupt {
                    namespace: NS_CREDENTIALS,
                    key: KEY_DEVICE_ID,
                });
            }
            return Ok(id);
        }

        let id = self.mac.device_id();
        self.kv.set(NS_CREDENTIALS, KEY_DEVICE_ID, id.as_bytes())?;
        self.kv.commit(NS_CREDENTIALS)?;
        info!("Device ID {} derived from MAC {}", id, self.mac);
        Ok(id)
    }

    /// Stored OOB secret, derived and persisted on first use.
    ///
    /// An existing secret is never replaced. A stored value that does not
    /// decode is reported as corrupt rather than regenerated, since a new
    /// value would no longer match the server's derivation.
    pub fn load_oob_secret(&self) -> Result<OobSecret, StorageError> {
        if let Some(hex) = self.get_secret_string(NS_CREDENTIALS, KEY_OOB_SECRET)? {
            return OobSecret::from_hex(&hex).ok_or(StorageError::Corrupt {
                namespace: NS_CREDENTIALS,
                key: KEY_OOB_SECRET,
            });
        }

        let device_id = self.load_device_id()?;
        let secret = Self::generate_oob_secret(&device_id);
        let hex = Zeroizing::new(secret.to_hex());
        self.kv.set(NS_CREDENTIALS, KEY_OOB_SECRET, hex.as_bytes())?;
        self.kv.commit(NS_CREDENTIALS)?;
        info!("OOB secret generated for device {}", device_id);
        Ok(secret)
    }

    // --- token pair ---

    /// Persist the access/refresh pair.
    pub fn save_tokens(&self, access: &str, refresh: &str) -> Result<(), StorageError> {
        self.kv.set(NS_TOKENS, KEY_ACCESS_TOKEN, access.as_bytes())?;
        self.kv.set(NS_TOKENS, KEY_REFRESH_TOKEN, refresh.as_bytes())?;
        self.kv.commit(NS_TOKENS)
    }

    /// Whether an access token is stored. Read failures count as absent.
    pub fn have_tokens(&self) -> bool {
        match self.kv.get(NS_TOKENS, KEY_ACCESS_TOKEN) {
            Ok(value) => value.is_some_and(|v| !v.is_empty()),
            Err(e) => {
                warn!("Token presence check failed: {}", e);
                false
            }
        }
    }

    pub fn load_access_token(&self) -> Result<Option<Zeroizing<String>>, StorageError> {
        self.get_secret_string(NS_TOKENS, KEY_ACCESS_TOKEN)
    }

    pub fn load_refresh_token(&self) -> Result<Option<Zeroizing<String>>, StorageError> {
        self.get_secret_string(NS_TOKENS, KEY_REFRESH_TOKEN)
    }

    /// Remove every key of the `tokens` namespace.
    pub fn clear_tokens(&self) -> Result<(), StorageError> {
        for key in [
            KEY_ACCESS_TOKEN,
            KEY_REFRESH_TOKEN,
            KEY_EXPIRY,
            KEY_DEVICE_ID,
            KEY_CHILD_ID,
        ] {
            self.kv.remove(NS_TOKENS, key)?;
        }
        self.kv.commit(NS_TOKENS)
    }

    /// Persist the current token with its expiry and owner.
    pub fn save_token_record(&self, record: &TokenRecord) -> Result<(), StorageError> {
        self.kv.set(NS_TOKENS, KEY_ACCESS_TOKEN, record.token.as_bytes())?;
        self.kv.set(NS_TOKENS, KEY_EXPIRY, &encode_expiry(record.expiry))?;
        self.kv.set(NS_TOKENS, KEY_DEVICE_ID, record.device_id.as_bytes())?;
        self.kv.set(NS_TOKENS, KEY_CHILD_ID, record.child_id.as_bytes())?;
        self.kv.commit(NS_TOKENS)
    }

    /// Load the persisted token. A token without an expiry is ignored.
    pub fn load_token_record(&self) -> Result<Option<TokenRecord>, StorageError> {
        let token = match self.get_secret_string(NS_TOKENS, KEY_ACCESS_TOKEN)? {
            Some(token) if !token.is_empty() => token,
            _ => return Ok(None),
        };
        let expiry = match self.kv.get(NS_TOKENS, KEY_EXPIRY)? {
            Some(bytes) => decode_expiry(&bytes).ok_or(StorageError::Corrupt {
                namespace: NS_TOKENS,
                key: KEY_EXPIRY,
            })?,
            None => {
                warn!("Stored token has no expiry, ignoring it");
                return Ok(None);
            }
        };

        Ok(Some(TokenRecord {
            token: token.as_str().to_owned(),
            expiry,
            device_id: self.get_string(NS_TOKENS, KEY_DEVICE_ID)?.unwrap_or_default(),
            child_id: self.get_string(NS_TOKENS, KEY_CHILD_ID)?.unwrap_or_default(),
        }))
    }

    // --- pairing artifacts ---

    pub fn save_pairing_code(&self, code: &str) -> Result<(), StorageError> {
        self.kv.set(NS_CREDENTIALS, KEY_PAIRING_CODE, code.as_bytes())?;
        self.kv.commit(NS_CREDENTIALS)
    }

    pub fn load_pairing_code(&self) -> Result<Option<Zeroizing<String>>, StorageError> {
        self.get_secret_string(NS_CREDENTIALS, KEY_PAIRING_CODE)
    }

    pub fn save_child_id(&self, child_id: &str) -> Result<(), StorageError> {
        self.kv.set(NS_CREDENTIALS, KEY_CHILD_ID, child_id.as_bytes())?;
        self.kv.commit(NS_CREDENTIALS)
    }

    pub fn load_child_id(&self) -> Result<Option<String>, StorageError> {
        self.get_string(NS_CREDENTIALS, KEY_CHILD_ID)
    }

    /// Stored as i32 LE; -1 means unset.
    pub fn save_child_age(&self, age: i32) -> Result<(), StorageError> {
        self.kv.set(NS_CREDENTIALS, KEY_CHILD_AGE, &age.to_le_bytes())?;
        self.kv.commit(NS_CREDENTIALS)
    }

    pub fn load_child_age(&self) -> Result<Option<i32>, StorageError> {
        match self.kv.get(NS_CREDENTIALS, KEY_CHILD_AGE)? {
            Some(bytes) => {
                let arr: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::Corrupt {
                        namespace: NS_CREDENTIALS,
                        key: KEY_CHILD_AGE,
                    }
                })?;
                Ok(Some(i32::from_le_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Store a server-issued provisioning payload as base64 of its JSON.
    pub fn save_provisioning_payload(
        &self,
        payload: &serde_json::Value,
    ) -> Result<(), StorageError> {
        let encoded = BASE64.encode(payload.to_string());
        self.kv.set(NS_CREDENTIALS, KEY_PROVISIONING_PAYLOAD, encoded.as_bytes())?;
        self.kv.commit(NS_CREDENTIALS)
    }

    pub fn load_provisioning_payload(&self) -> Result<Option<serde_json::Value>, StorageError> {
        let corrupt = || StorageError::Corrupt {
            namespace: NS_CREDENTIALS,
            key: KEY_PROVISIONING_PAYLOAD,
        };
        match self.kv.get(NS_CREDENTIALS, KEY_PROVISIONING_PAYLOAD)? {
            Some(encoded) => {
                let json = BASE64.decode(&encoded).map_err(|_| corrupt())?;
                serde_json::from_slice(&json).map(Some).map_err(|_| corrupt())
            }
            None => Ok(None),
        }
    }

    pub fn save_device_config(&self, config: &serde_json::Value) -> Result<(), StorageError> {
        self.kv.set(NS_CREDENTIALS, KEY_DEVICE_CONFIG, config.to_string().as_bytes())?;
        self.kv.commit(NS_CREDENTIALS)
    }

    pub fn load_device_config(&self) -> Result<Option<serde_json::Value>, StorageError> {
        match self.kv.get(NS_CREDENTIALS, KEY_DEVICE_CONFIG)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| StorageError::Corrupt {
                    namespace: NS_CREDENTIALS,
                    key: KEY_DEVICE_CONFIG,
                }),
            None => Ok(None),
        }
    }

    // --- WiFi ---

    pub fn save_wifi_config(&self, config: &WifiConfig) -> Result<(), StorageError> {
        let bytes = Zeroizing::new(config.to_bytes());
        self.kv.set(NS_WIFI, KEY_WIFI_CREDENTIALS, &bytes)?;
        self.kv.commit(NS_WIFI)?;
        info!("WiFi config saved for SSID '{}'", config.ssid);
        Ok(())
    }

    pub fn load_wifi_config(&self) -> Result<Option<WifiConfig>, StorageError> {
        match self.kv.get(NS_WIFI, KEY_WIFI_CREDENTIALS)? {
            Some(bytes) => {
                let bytes = Zeroizing::new(bytes);
                WifiConfig::from_bytes(&bytes)
                    .map(Some)
                    .map_err(|_| StorageError::Corrupt {
                        namespace: NS_WIFI,
                        key: KEY_WIFI_CREDENTIALS,
                    })
            }
            None => Ok(None),
        }
    }

    pub fn clear_wifi_config(&self) -> Result<(), StorageError> {
        self.kv.remove(NS_WIFI, KEY_WIFI_CREDENTIALS)?;
        self.kv.commit(NS_WIFI)
    }

    // --- provisioning ---

    /// Store everything a provisioning session delivered.
    ///
    /// Credentials are committed before the WiFi blob, so a device that finds
    /// WiFi credentials after a power cut also has its pairing artifacts.
    pub fn save_provisioning(&self, data: &ProvisioningData) -> Result<(), StorageError> {
        self.kv.set(NS_CREDENTIALS, KEY_CHILD_ID, data.child_id.as_bytes())?;
        self.kv.set(NS_CREDENTIALS, KEY_PAIRING_CODE, data.pairing_code.as_bytes())?;
        self.kv.set(NS_CREDENTIALS, KEY_CHILD_AGE, &data.child_age.to_le_bytes())?;
        self.kv.commit(NS_CREDENTIALS)?;
        self.save_wifi_config(&data.wifi)
    }

    /// True once WiFi credentials and a pairing code are stored.
    pub fn is_provisioned(&self) -> Result<bool, StorageError> {
        Ok(self.kv.get(NS_WIFI, KEY_WIFI_CREDENTIALS)?.is_some()
            && self.kv.get(NS_CREDENTIALS, KEY_PAIRING_CODE)?.is_some())
    }

    /// Erase pairing artifacts, tokens and WiFi credentials.
    ///
    /// The device ID and OOB secret survive: they are bound to the hardware.
    pub fn factory_reset(&self) -> Result<(), StorageError> {
        for key in [
            KEY_PAIRING_CODE,
            KEY_PROVISIONING_PAYLOAD,
            KEY_CHILD_ID,
            KEY_CHILD_AGE,
            KEY_DEVICE_CONFIG,
        ] {
            self.kv.remove(NS_CREDENTIALS, key)?;
        }
        self.kv.commit(NS_CREDENTIALS)?;
        self.clear_tokens()?;
        self.clear_wifi_config()?;
        warn!("Factory reset: pairing, tokens and WiFi credentials erased");
        Ok(())
    }

    fn get_string(
        &self,
        namespace: &'static str,
        key: &'static str,
    ) -> Result<Option<String>, StorageError> {
        match self.kv.get(namespace, key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StorageError::Corrupt { namespace, key }),
            None => Ok(None),
        }
    }

    fn get_secret_string(
        &self,
        namespace: &'static str,
        key: &'static str,
    ) -> Result<Option<Zeroizing<String>>, StorageError> {
        Ok(self.get_string(namespace, key)?.map(Zeroizing::new))
    }
}
