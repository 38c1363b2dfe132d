//! Claim endpoint request and response bodies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of `POST /api/v1/pair/claim`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub device_id: String,
    pub child_id: String,
    /// 16 random bytes, hex.
    pub nonce: String,
    /// HMAC-SHA256 proof, lower-case hex.
    #[serde(rename = "hmac_hex")]
    pub hmac: String,
    pub firmware_version: String,
}

/// Successful claim answer.
#[derive(Clone, PartialEq, Deserialize)]
pub struct ClaimResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    #[serde(alias = "expires_in_sec")]
    pub expires_in: u32,
    #[serde(default)]
    pub device_session_id: Option<String>,
    #[serde(default)]
    pub child_profile: Option<serde_json::Value>,
    #[serde(default)]
    pub device_config: Option<serde_json::Value>,
    #[serde(default)]
    pub pairing_code: Option<String>,
    #[serde(default)]
    pub provisioning_payload: Option<serde_json::Value>,
}

impl fmt::Debug for ClaimResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimResponse")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("refresh_token", &format_args!("<{} bytes>", self.refresh_token.len()))
            .field("expires_in", &self.expires_in)
            .field("device_session_id", &self.device_session_id)
            .field("has_device_config", &self.device_config.is_some())
            .finish()
    }
}

/// Error body some server failures carry.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(alias = "detail", alias = "error")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_response() {
        let r: ClaimResponse = serde_json::from_str(
            r#"{"access_token":"tok123","refresh_token":"ref123","expires_in":300}"#,
        )
        .unwrap();
        assert_eq!(r.access_token, "tok123");
        assert_eq!(r.refresh_token, "ref123");
        assert_eq!(r.expires_in, 300);
        assert!(r.device_config.is_none());
        assert!(r.pairing_code.is_none());
    }

    #[test]
    fn test_expires_in_sec_alias() {
        let r: ClaimResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"b","expires_in_sec":900,
                "device_session_id":"s-1","device_config":{"ws_url":"wss://0.0.0.0/ws"}}"#,
        )
        .unwrap();
        assert_eq!(r.expires_in, 900);
        assert_eq!(r.device_session_id.as_deref(), Some("s-1"));
        assert!(r.device_config.is_some());
    }

    #[test]
    fn test_request_field_names() {
        let req = ClaimRequest {
            device_id: "ABCDEF123456".into(),
            child_id: "child-001".into(),
            nonce: "00".repeat(16),
            hmac: "ab".repeat(32),
            firmware_version: "0.1.0".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        for field in ["device_id", "child_id", "nonce", "hmac_hex", "firmware_version"] {
            assert!(v.get(field).is_some(), "missing {}", field);
        }
        assert!(v.get("hmac").is_none());
        assert_eq!(v["hmac_hex"], "ab".repeat(32));
    }

    #[test]
    fn test_debug_hides_tokens() {
        let r: ClaimResponse = serde_json::from_str(
            r#"{"access_token":"secret-access","refresh_token":"secret-refresh","expires_in":1}"#,
        )
        .unwrap();
        assert!(!format!("{:?}", r).contains("secret"));
    }
}
