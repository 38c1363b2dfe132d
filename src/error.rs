//! Error taxonomy for the identity and authentication core.
//!
//! Every fallible operation in the crate reports one of these variants:
//!
//! | Variant | Origin | Retry? |
//! |---------|--------|--------|
//! | [`Error::Protocol`] | malformed BLE packet or refresh message | no |
//! | [`Error::Crypto`] | GCM tag mismatch, bad key material | no |
//! | [`Error::Validation`] | field out of bounds or bad format | no |
//! | [`Error::Transport`] | HTTP / refresh channel failure | see [`TransportError::is_retryable`] |
//! | [`Error::Auth`] | server rejected our credentials | no, re-provision |
//! | [`Error::Storage`] | persistence read/write failure | no |
//! | [`Error::State`] | lifecycle misuse (not initialized, no token) | no |

use crate::config::ConfigError;
use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug)]
pub enum Error {
    /// Malformed input on the wire.
    Protocol(String),
    /// Authenticated decryption or key handling failed.
    Crypto(String),
    /// A decoded field is out of bounds.
    Validation(ValidationError),
    /// Network transport failure.
    Transport(TransportError),
    /// The server rejected the device's credentials.
    Auth { status: u16, message: String },
    /// Persistent storage failure.
    Storage(StorageError),
    /// Operation invoked in the wrong lifecycle state.
    State(&'static str),
}

impl Error {
    /// Whether the failed operation may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Crypto(msg) => write!(f, "crypto error: {}", msg),
            Self::Validation(e) => write!(f, "validation error: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Auth { status, message } => {
                write!(f, "authentication rejected ({}): {}", status, message)
            }
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::State(msg) => write!(f, "invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Validation(ValidationError::Wifi(e))
    }
}

/// A field failed its bounds or format check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// WiFi SSID or password rejected.
    Wifi(ConfigError),
    /// Child ID is not a dashed 36-char UUID.
    ChildId(String),
    /// Pairing code has the wrong length or characters.
    PairingCode(String),
    /// Child age outside 0-18 (and not the -1 sentinel).
    ChildAge(i32),
    /// Device ID does not match `^[A-Za-z0-9_-]+$`.
    DeviceId(String),
    /// Payload could not be decoded.
    Malformed(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wifi(e) => write!(f, "wifi: {}", e),
            Self::ChildId(msg) => write!(f, "child_id: {}", msg),
            Self::PairingCode(msg) => write!(f, "pairing_code: {}", msg),
            Self::ChildAge(age) => write!(f, "child_age out of range: {}", age),
            Self::DeviceId(id) => write!(f, "device_id has invalid characters: {:?}", id),
            Self::Malformed(msg) => write!(f, "malformed payload: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Network transport failure, classified by retry eligibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request did not complete within the configured timeout.
    Timeout,
    /// Connection could not be established or was dropped.
    Connection(String),
    /// Server answered 429.
    RateLimited,
    /// Server answered 5xx.
    Server { status: u16 },
    /// No channel is available to carry the request.
    Unavailable,
    /// Response body could not be decoded.
    InvalidResponse(String),
}

impl TransportError {
    /// Transient failures are retried with backoff; malformed responses are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidResponse(_) | Self::Unavailable)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Connection(msg) => write!(f, "connection failed: {}", msg),
            Self::RateLimited => write!(f, "rate limited by server"),
            Self::Server { status } => write!(f, "server error {}", status),
            Self::Unavailable => write!(f, "no transport available"),
            Self::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Persistent storage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend could not be opened.
    Unavailable(String),
    /// Reading a key failed.
    Read {
        namespace: &'static str,
        key: &'static str,
        reason: String,
    },
    /// Writing or committing a key failed.
    Write {
        namespace: &'static str,
        key: &'static str,
        reason: String,
    },
    /// Stored bytes do not decode to the expected type.
    Corrupt {
        namespace: &'static str,
        key: &'static str,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "storage unavailable: {}", msg),
            Self::Read {
                namespace,
                key,
                reason,
            } => write!(f, "failed to read {}/{}: {}", namespace, key, reason),
            Self::Write {
                namespace,
                key,
                reason,
            } => write!(f, "failed to write {}/{}: {}", namespace, key, reason),
            Self::Corrupt { namespace, key } => {
                write!(f, "stored value {}/{} is corrupt", namespace, key)
            }
        }
    }
}

impl std::error::Error for StorageError {}
