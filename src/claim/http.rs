//! HTTP capability used by the claim client.
//!
//! The claim client only needs "POST this JSON, give me status and body".
//! Platform transports implement [`ClaimHttp`]; tests substitute scripted
//! doubles.

use crate::error::TransportError;
use async_trait::async_trait;

/// Status and body of an HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Check if the response indicates success (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the response body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body as text, lossily, for log lines.
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// POST-only JSON client.
#[async_trait]
pub trait ClaimHttp: Send + Sync {
    /// POST `body` (JSON) to `url`.
    ///
    /// Any HTTP status is a successful exchange; only failures to complete the
    /// exchange are errors.
    async fn post_json(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_is_success() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(301, "").is_success());
        assert!(!HttpResponse::new(429, "").is_success());
    }

    #[test]
    fn test_response_json() {
        let r = HttpResponse::new(200, r#"{"a":1}"#);
        let v: serde_json::Value = r.json().unwrap();
        assert_eq!(v["a"], 1);
        assert!(HttpResponse::new(200, "nope").json::<serde_json::Value>().is_err());
    }
}
