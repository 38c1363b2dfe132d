//! Status replies sent on the notify characteristic.
//!
//! Every reply is a compact JSON object of at most 64 bytes:
//!
//! ```text
//! {"status":"ok"}
//! {"status":"error","code":"decryption_failed"}
//! {"status":"timeout"}
//! ```

use crate::error::Error;
use std::fmt;

/// Largest status reply.
pub const MAX_STATUS_LEN: usize = 64;

/// Failure reported to the BLE peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningErrorCode {
    /// Packet size outside the accepted range.
    InvalidPacket,
    /// No PoP key is loaded.
    NoPopKey,
    /// GCM authentication failed.
    DecryptionFailed,
    /// Decrypted payload failed field validation.
    InvalidCredentials,
    /// Credentials could not be persisted.
    SaveFailed,
    /// Anything else.
    InternalError,
}

impl ProvisioningErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPacket => "invalid_packet",
            Self::NoPopKey => "no_pop_key",
            Self::DecryptionFailed => "decryption_failed",
            Self::InvalidCredentials => "invalid_credentials",
            Self::SaveFailed => "save_failed",
            Self::InternalError => "internal_error",
        }
    }

    /// Failures that end the session instead of waiting for another packet.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SaveFailed | Self::InternalError)
    }

    /// Map a failed step to the code reported to the peer.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Protocol(_) => Self::InvalidPacket,
            Error::Crypto(_) => Self::DecryptionFailed,
            Error::Validation(_) => Self::InvalidCredentials,
            Error::Storage(_) => Self::SaveFailed,
            _ => Self::InternalError,
        }
    }
}

impl fmt::Display for ProvisioningErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply written to the status characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReply {
    Ok,
    Error(ProvisioningErrorCode),
    Timeout,
}

impl StatusReply {
    /// JSON form, always within [`MAX_STATUS_LEN`].
    pub fn to_json(&self) -> String {
        match self {
            Self::Ok => r#"{"status":"ok"}"#.to_string(),
            Self::Error(code) => format!(r#"{{"status":"error","code":"{}"}}"#, code),
            Self::Timeout => r#"{"status":"timeout"}"#.to_string(),
        }
    }
}
