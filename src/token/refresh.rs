//! Refresh protocol carried over the live transport connection.
//!
//! Outbound: `{"type":"auth/refresh","proof":"<last 8 chars of token>"}`
//!
//! Inbound:
//! - `{"type":"auth/ok","exp_in_sec":N}` with an optional `"token"` when the
//!   server rotates the bearer token
//! - `{"type":"auth/error","reason":"..."}`

use crate::error::{Error, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type of the outbound request.
pub const REFRESH_REQUEST_TYPE: &str = "auth/refresh";

/// Channel the token manager sends refresh requests through.
///
/// Implemented by whatever transport currently carries the session
/// (normally the WebSocket). Responses come back through
/// `TokenManager::handle_refresh_response`.
#[async_trait]
pub trait RefreshChannel: Send + Sync {
    async fn send_refresh(&self, message: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    proof: &'a str,
}

impl<'a> RefreshRequest<'a> {
    pub fn new(proof: &'a str) -> Self {
        Self {
            kind: REFRESH_REQUEST_TYPE,
            proof,
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self)
            .map_err(|e| Error::Protocol(format!("encode refresh request: {}", e)))
    }
}

/// Server answer to a refresh request.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum RefreshResponse {
    #[serde(rename = "auth/ok")]
    Ok {
        #[serde(alias = "expires_in")]
        exp_in_sec: u32,
        #[serde(default)]
        token: Option<String>,
    },
    #[serde(rename = "auth/error")]
    Error {
        #[serde(default)]
        reason: String,
    },
}

impl RefreshResponse {
    pub fn parse(message: &str) -> Result<Self, Error> {
        serde_json::from_str(message)
            .map_err(|e| Error::Protocol(format!("bad refresh response: {}", e)))
    }
}

impl fmt::Debug for RefreshResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok { exp_in_sec, token } => f
                .debug_struct("Ok")
                .field("exp_in_sec", exp_in_sec)
                .field("rotated", &token.is_some())
                .finish(),
            Self::Error { reason } => f.debug_struct("Error").field("reason", reason).finish(),
        }
    }
}
