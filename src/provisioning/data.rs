//! Decrypted provisioning payload.
//!
//! The phone app sends a JSON object:
//!
//! ```json
//! {
//!   "ssid": "HomeNetwork",
//!   "password": "hunter22",
//!   "child_id": "123e4567-e89b-12d3-a456-426614174000",
//!   "pairing_code": "TEDDY-1234",
//!   "child_age": 6
//! }
//! ```
//!
//! `password` may be omitted for open networks and `child_age` may be omitted
//! (stored as `-1`).

use crate::config::WifiConfig;
use crate::error::{Error, ValidationError};
use serde::Deserialize;

/// Child age used when none was provided.
pub const CHILD_AGE_UNSET: i32 = -1;

/// Oldest accepted child age.
pub const MAX_CHILD_AGE: i32 = 18;

/// Length of a dashed UUID.
pub const CHILD_ID_LEN: usize = 36;

/// Pairing code length bounds.
pub const MIN_PAIRING_CODE_LEN: usize = 1;
pub const MAX_PAIRING_CODE_LEN: usize = 64;

/// Validated credentials ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningData {
    pub wifi: WifiConfig,
    pub child_id: String,
    pub pairing_code: String,
    pub child_age: i32,
}

#[derive(Deserialize)]
struct Wire {
    ssid: String,
    #[serde(default)]
    password: String,
    child_id: String,
    pairing_code: String,
    #[serde(default = "unset_age")]
    child_age: i32,
}

fn unset_age() -> i32 {
    CHILD_AGE_UNSET
}

impl ProvisioningData {
    /// Parse and validate a decrypted payload.
    ///
    /// Nothing is returned unless every field passes, so callers never see a
    /// partially valid record.
    pub fn from_json(plaintext: &[u8]) -> Result<Self, Error> {
        let wire: Wire = serde_json::from_slice(plaintext)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let data = Self {
            wifi: WifiConfig {
                ssid: wire.ssid,
                password: wire.password,
            },
            child_id: wire.child_id,
            pairing_code: wire.pairing_code,
            child_age: wire.child_age,
        };

        data.validate()?;
        Ok(data)
    }

    /// Check every field against its bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.wifi.validate().map_err(ValidationError::Wifi)?;
        validate_child_id(&self.child_id)?;
        validate_pairing_code(&self.pairing_code)?;
        validate_child_age(self.child_age)?;
        Ok(())
    }

    /// Whether a child age was supplied.
    pub fn has_child_age(&self) -> bool {
        self.child_age != CHILD_AGE_UNSET
    }
}

/// Check a dashed 36-char UUID (dashes at 8, 13, 18 and 23, hex elsewhere).
pub fn validate_child_id(id: &str) -> Result<(), ValidationError> {
    if id.len() != CHILD_ID_LEN {
        return Err(ValidationError::ChildId(format!(
            "expected {} chars, got {}",
            CHILD_ID_LEN,
            id.len()
        )));
    }
    for (i, b) in id.bytes().enumerate() {
        let ok = match i {
            8 | 13 | 18 | 23 => b == b'-',
            _ => b.is_ascii_hexdigit(),
        };
        if !ok {
            return Err(ValidationError::ChildId(format!(
                "unexpected character at position {}",
                i
            )));
        }
    }
    Ok(())
}

/// Check pairing code length; the code must be printable ASCII without
/// spaces. The server chooses the format, so the alphabet is not restricted
/// further.
pub fn validate_pairing_code(code: &str) -> Result<(), ValidationError> {
    if code.len() < MIN_PAIRING_CODE_LEN || code.len() > MAX_PAIRING_CODE_LEN {
        return Err(ValidationError::PairingCode(format!(
            "length {} outside {}..={}",
            code.len(),
            MIN_PAIRING_CODE_LEN,
            MAX_PAIRING_CODE_LEN
        )));
    }
    if !code.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(ValidationError::PairingCode("invalid characters".into()));
    }
    Ok(())
}

/// Accept 0-18 or the unset sentinel.
pub fn validate_child_age(age: i32) -> Result<(), ValidationError> {
    if age == CHILD_AGE_UNSET || (0..=MAX_CHILD_AGE).contains(&age) {
        Ok(())
    } else {
        Err(ValidationError::ChildAge(age))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    const CHILD: &str = "123e4567-e89b-12d3-a456-426614174000";

    fn payload(password: &str, age: Option<i32>) -> Vec<u8> {
        let mut v = serde_json::json!({
            "ssid": "HomeNetwork",
            "password": password,
            "child_id": CHILD,
            "pairing_code": "TEDDY-1234",
        });
        if let Some(age) = age {
            v["child_age"] = age.into();
        }
        serde_json::to_vec(&v).unwrap()
    }

    // ==================== Parse Tests ====================

    #[test]
    fn test_parse_full_payload() {
        let data = ProvisioningData::from_json(&payload("hunter22", Some(6))).unwrap();
        assert_eq!(data.wifi.ssid, "HomeNetwork");
        assert_eq!(data.wifi.password, "hunter22");
        assert_eq!(data.child_id, CHILD);
        assert_eq!(data.pairing_code, "TEDDY-1234");
        assert_eq!(data.child_age, 6);
        assert!(data.has_child_age());
    }

    #[test]
    fn test_missing_age_is_unset() {
        let data = ProvisioningData::from_json(&payload("hunter22", None)).unwrap();
        assert_eq!(data.child_age, CHILD_AGE_UNSET);
        assert!(!data.has_child_age());
    }

    #[test]
    fn test_open_network_accepted() {
        let data = ProvisioningData::from_json(&payload("", None)).unwrap();
        assert!(data.wifi.is_open());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            ProvisioningData::from_json(b"{\"ssid\":"),
            Err(Error::Validation(ValidationError::Malformed(_)))
        ));
        assert!(matches!(
            ProvisioningData::from_json(b"{\"ssid\":\"x\"}"),
            Err(Error::Validation(ValidationError::Malformed(_)))
        ));
    }

    // ==================== Bounds Tests ====================

    #[test]
    fn test_short_password_rejected() {
        assert!(matches!(
            ProvisioningData::from_json(&payload("short", None)),
            Err(Error::Validation(ValidationError::Wifi(
                ConfigError::PasswordTooShort { .. }
            )))
        ));
    }

    #[test]
    fn test_age_bounds() {
        assert!(ProvisioningData::from_json(&payload("hunter22", Some(0))).is_ok());
        assert!(ProvisioningData::from_json(&payload("hunter22", Some(18))).is_ok());
        assert!(matches!(
            ProvisioningData::from_json(&payload("hunter22", Some(19))),
            Err(Error::Validation(ValidationError::ChildAge(19)))
        ));
        assert!(ProvisioningData::from_json(&payload("hunter22", Some(-2))).is_err());
    }

    #[test]
    fn test_child_id_format() {
        assert!(validate_child_id(CHILD).is_ok());
        assert!(validate_child_id("123e4567e89b12d3a456426614174000").is_err());
        assert!(validate_child_id("123e4567-e89b-12d3-a456-42661417400g").is_err());
        assert!(validate_child_id("123e4567-e89b-12d3-a456_426614174000").is_err());
    }

    #[test]
    fn test_pairing_code_format() {
        assert!(validate_pairing_code("ABCD").is_ok());
        assert!(validate_pairing_code("pair_42").is_ok());
        assert!(validate_pairing_code("7").is_ok());
        assert!(validate_pairing_code("").is_err());
        assert!(validate_pairing_code("ABCD 1234").is_err());
        assert!(validate_pairing_code("ABCD\n").is_err());
        assert!(validate_pairing_code(&"A".repeat(65)).is_err());
    }
}
