//! WiFi credentials delivered through BLE provisioning.
//!
//! Platform-independent so the bounds can be tested on the host.
//!
//! # Example
//!
//! ```
//! use teddy_auth_esp32::config::WifiConfig;
//!
//! let config = WifiConfig::new("HomeNetwork", "hunter22").unwrap();
//! assert!(!config.is_open());
//! ```

use std::fmt;
use zeroize::Zeroize;

/// Maximum SSID length per IEEE 802.11.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum WPA2 passphrase length.
pub const MAX_PASSWORD_LEN: usize = 63;

/// Minimum WPA2 passphrase length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// WiFi credentials for the access point the toy should join.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiConfig {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Passphrase (8-63 bytes, empty for open networks).
    pub password: String,
}

impl WifiConfig {
    /// Create a validated configuration.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate SSID and passphrase bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        // Empty is an open network
        if !self.password.is_empty() && self.password.len() < MIN_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooShort {
                len: self.password.len(),
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        Ok(())
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    /// Serialize for storage.
    ///
    /// Format: `[ssid_len:1][ssid:N][password_len:1][password:M]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.ssid.len() + self.password.len());
        bytes.push(self.ssid.len() as u8);
        bytes.extend_from_slice(self.ssid.as_bytes());
        bytes.push(self.password.len() as u8);
        bytes.extend_from_slice(self.password.as_bytes());
        bytes
    }

    /// Deserialize from the storage format, re-validating the bounds.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let (&ssid_len, rest) = bytes
            .split_first()
            .ok_or_else(|| ConfigError::InvalidFormat("empty data".into()))?;
        let ssid_len = ssid_len as usize;
        if rest.len() < ssid_len + 1 {
            return Err(ConfigError::InvalidFormat("truncated SSID".into()));
        }
        let (ssid, rest) = rest.split_at(ssid_len);
        let password_len = rest[0] as usize;
        let password = rest
            .get(1..1 + password_len)
            .ok_or_else(|| ConfigError::InvalidFormat("truncated password".into()))?;

        let ssid = String::from_utf8(ssid.to_vec())
            .map_err(|_| ConfigError::InvalidFormat("invalid SSID UTF-8".into()))?;
        let password = String::from_utf8(password.to_vec())
            .map_err(|_| ConfigError::InvalidFormat("invalid password UTF-8".into()))?;

        Self::new(ssid, password)
    }
}

impl fmt::Debug for WifiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiConfig")
            .field("ssid", &self.ssid)
            .field("password", &format_args!("<{} bytes>", self.password.len()))
            .finish()
    }
}

impl Drop for WifiConfig {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// WiFi credential validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password is too short for WPA2.
    PasswordTooShort { len: usize, min: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// Invalid data format during deserialization.
    InvalidFormat(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} bytes (min {})", len, min)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Bounds Tests ====================

    #[test]
    fn test_valid_config() {
        let config = WifiConfig::new("TestNetwork", "password123").unwrap();
        assert_eq!(config.ssid, "TestNetwork");
        assert!(!config.is_open());
    }

    #[test]
    fn test_open_network() {
        let config = WifiConfig::new("OpenNetwork", "").unwrap();
        assert!(config.is_open());
    }

    #[test]
    fn test_empty_ssid() {
        assert_eq!(WifiConfig::new("", "password123"), Err(ConfigError::SsidEmpty));
    }

    #[test]
    fn test_ssid_bounds() {
        assert!(WifiConfig::new("a".repeat(32), "password123").is_ok());
        assert!(matches!(
            WifiConfig::new("a".repeat(33), "password123"),
            Err(ConfigError::SsidTooLong { len: 33, max: 32 })
        ));
    }

    #[test]
    fn test_password_bounds() {
        assert!(matches!(
            WifiConfig::new("Net", "1234567"),
            Err(ConfigError::PasswordTooShort { .. })
        ));
        assert!(WifiConfig::new("Net", "12345678").is_ok());
        assert!(WifiConfig::new("Net", "p".repeat(63)).is_ok());
        assert!(matches!(
            WifiConfig::new("Net", "p".repeat(64)),
            Err(ConfigError::PasswordTooLong { len: 64, max: 63 })
        ));
    }

    // ==================== Storage Format Tests ====================

    #[test]
    fn test_storage_format_restores_config() {
        let config = WifiConfig::new("MyNetwork", "MyPassword").unwrap();
        let restored = WifiConfig::from_bytes(&config.to_bytes()).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn test_deserialize_empty() {
        assert!(matches!(
            WifiConfig::from_bytes(&[]),
            Err(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_deserialize_truncated() {
        assert!(matches!(
            WifiConfig::from_bytes(&[5, b'h', b'e', b'l', b'l']),
            Err(ConfigError::InvalidFormat(_))
        ));
        assert!(matches!(
            WifiConfig::from_bytes(&[1, b'h', 9, b'x']),
            Err(ConfigError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = WifiConfig::new("Net", "supersecret").unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("11 bytes"));
    }
}
