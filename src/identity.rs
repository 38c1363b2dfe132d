//! Device identity primitives.
//!
//! The device is identified to the pairing server by its canonical radio MAC
//! (`A1B2C3D4E5F6`). The out-of-band (OOB) secret that keys every claim HMAC
//! is derived from that ID with a fixed salt, so the server can compute the
//! same value independently:
//!
//! ```text
//! inner  = hex(SHA256(device_id ":" salt))
//! secret = SHA256(inner ‖ salt)
//! ```
//!
//! # Example
//!
//! ```
//! use teddy_auth_esp32::identity::{canonical_device_id, generate_oob_secret};
//!
//! let id = canonical_device_id("ab:cd:ef:12:34:56").unwrap();
//! assert_eq!(id, "ABCDEF123456");
//! assert_eq!(generate_oob_secret(&id), generate_oob_secret(&id));
//! ```

use crate::error::ValidationError;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Salt shared with the pairing server.
pub const OOB_SALT: &str = "ai-teddy-bear-oob-v1";

/// Raw OOB secret length.
pub const OOB_SECRET_LEN: usize = 32;

/// Radio MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Create an address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Canonical device ID: upper-case hex, no separators.
    pub fn device_id(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Read the factory-programmed WiFi station MAC from eFuse.
    #[cfg(feature = "esp32")]
    pub fn read_station_mac() -> Result<Self, esp_idf_sys::EspError> {
        let mut mac = [0u8; 6];
        esp_idf_sys::esp!(unsafe {
            esp_idf_sys::esp_read_mac(mac.as_mut_ptr(), esp_idf_sys::esp_mac_type_t_ESP_MAC_WIFI_STA)
        })?;
        Ok(Self(mac))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Canonicalize a MAC-like string into a server-acceptable device ID.
///
/// Strips `:`, `-` and `.` separators and upper-cases the rest. The result must
/// match `^[A-Za-z0-9_-]+$`.
pub fn canonical_device_id(raw: &str) -> Result<String, ValidationError> {
    let id: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    validate_device_id(&id)?;
    Ok(id)
}

/// Check a device ID against `^[A-Za-z0-9_-]+$`.
pub fn validate_device_id(id: &str) -> Result<(), ValidationError> {
    let valid = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::DeviceId(id.to_string()))
    }
}

/// The 32-byte key for claim HMACs. Zeroed on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct OobSecret([u8; OOB_SECRET_LEN]);

impl OobSecret {
    /// Wrap raw secret bytes.
    pub const fn from_bytes(bytes: [u8; OOB_SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the 64-char hex form.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; OOB_SECRET_LEN];
        hex::decode_to_slice(s.trim(), &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; OOB_SECRET_LEN] {
        &self.0
    }

    /// Lower-case 64-char hex form, as persisted.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for OobSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OobSecret(<redacted>)")
    }
}

/// Derive the OOB secret for a device ID. Pure and deterministic.
pub fn generate_oob_secret(device_id: &str) -> OobSecret {
    let inner = Sha256::new()
        .chain_update(device_id.as_bytes())
        .chain_update(b":")
        .chain_update(OOB_SALT.as_bytes())
        .finalize();
    let inner_hex = hex::encode(inner);

    let outer = Sha256::new()
        .chain_update(inner_hex.as_bytes())
        .chain_update(OOB_SALT.as_bytes())
        .finalize();

    let mut bytes = [0u8; OOB_SECRET_LEN];
    bytes.copy_from_slice(&outer);
    OobSecret(bytes)
}
