//! Device claim client.
//!
//! Trades the pairing artifacts plus an HMAC proof of the OOB secret for the
//! initial token pair:
//!
//! 1. device ID from the credential store (MAC-derived, canonical)
//! 2. OOB secret from the credential store (derived on first use)
//! 3. fresh 16-byte nonce
//! 4. `HMAC-SHA256(secret, device_id ‖ child_id ‖ nonce)`
//! 5. `POST {base_url}/api/v1/pair/claim`
//!
//! | Status | Outcome |
//! |--------|---------|
//! | 2xx | parse [`ClaimResponse`] |
//! | 429 | retryable, backoff |
//! | 5xx | retryable, backoff |
//! | other 4xx (400/401/422, ...) | [`Error::Auth`], never retried |
//! | transport failure | retryable, backoff |

use super::device_config::rewrite_device_config;
use super::http::{ClaimHttp, HttpResponse};
use super::proof::{compute_claim_hmac, generate_nonce};
use super::types::{ClaimRequest, ClaimResponse, ErrorBody};
use crate::config::AuthConfig;
use crate::error::{Error, Result, TransportError};
use crate::storage::CredentialStore;
use crate::token::Backoff;
use log::{debug, info, warn};
use std::sync::Arc;

/// Longest server error message carried into [`Error::Auth`].
const MAX_ERROR_MESSAGE: usize = 120;

/// Claim client bound to one device's credential store.
#[derive(Clone)]
pub struct ClaimClient {
    config: AuthConfig,
    store: CredentialStore,
    http: Arc<dyn ClaimHttp>,
}

impl ClaimClient {
    pub fn new(config: AuthConfig, store: CredentialStore, http: Arc<dyn ClaimHttp>) -> Self {
        Self {
            config,
            store,
            http,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Build a signed request with a fresh nonce.
    ///
    /// The stored device ID is sent as-is; the OOB secret was derived from
    /// the same string.
    pub fn build_request(&self, child_id: &str) -> Result<ClaimRequest> {
        let device_id = self.store.load_device_id()?;
        let secret = self.store.load_oob_secret()?;
        let nonce = generate_nonce();
        let hmac = compute_claim_hmac(&secret, &device_id, child_id, &nonce);

        Ok(ClaimRequest {
            device_id,
            child_id: child_id.to_string(),
            nonce: hex::encode(nonce),
            hmac,
            firmware_version: self.config.firmware_version.clone(),
        })
    }

    /// One claim attempt.
    pub async fn claim(&self, child_id: &str) -> Result<ClaimResponse> {
        let request = self.build_request(child_id)?;
        let body = serde_json::to_string(&request)
            .map_err(|e| Error::Protocol(format!("encode claim request: {}", e)))?;

        let url = self.config.claim_url();
        info!("Claiming device {} for child {}", request.device_id, child_id);
        let response = self.http.post_json(&url, &body).await?;
        parse_response(&response)
    }

    /// Claim with bounded, backed-off retries of retryable failures.
    pub async fn claim_with_retry(&self, child_id: &str) -> Result<ClaimResponse> {
        let mut backoff = Backoff::from_config(&self.config);
        let max_attempts = self.config.claim_max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.claim(child_id).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Claim attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Claim failed after {} attempt(s): {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    /// Store everything the server handed back.
    ///
    /// Every artifact is attempted; the first storage error is returned.
    pub fn persist_artifacts(&self, response: &ClaimResponse) -> Result<()> {
        let mut first_err: Option<Error> = None;
        let mut note = |result: std::result::Result<(), crate::error::StorageError>| {
            if let Err(e) = result {
                warn!("Persisting claim artifact failed: {}", e);
                first_err.get_or_insert(Error::Storage(e));
            }
        };

        note(
            self.store
                .save_tokens(&response.access_token, &response.refresh_token),
        );
        if let Some(code) = &response.pairing_code {
            note(self.store.save_pairing_code(code));
        }
        if let Some(payload) = &response.provisioning_payload {
            note(self.store.save_provisioning_payload(payload));
        }
        if let Some(config) = &response.device_config {
            let mut config = config.clone();
            let changed = rewrite_device_config(
                &mut config,
                self.config.api_host(),
                self.config.tls_enabled,
            );
            if changed > 0 {
                debug!("Rewrote {} device config value(s)", changed);
            }
            note(self.store.save_device_config(&config));
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn parse_response(response: &HttpResponse) -> Result<ClaimResponse> {
    if response.is_success() {
        return response
            .json::<ClaimResponse>()
            .map_err(|e| TransportError::InvalidResponse(e.to_string()).into());
    }
    match response.status {
        429 => Err(TransportError::RateLimited.into()),
        500..=599 => Err(TransportError::Server {
            status: response.status,
        }
        .into()),
        400..=499 => Err(Error::Auth {
            status: response.status,
            message: error_message(response),
        }),
        other => Err(TransportError::InvalidResponse(format!("unexpected status {}", other)).into()),
    }
}

fn error_message(response: &HttpResponse) -> String {
    let message = match response.json::<ErrorBody>() {
        Ok(body) => body.message,
        Err(_) => response.text_lossy(),
    };
    message.chars().take(MAX_ERROR_MESSAGE).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::proof::NONCE_LEN;
    use crate::identity::{generate_oob_secret, MacAddress};
    use crate::storage::{KeyValueStore, MemoryStore, KEY_DEVICE_ID, NS_CREDENTIALS};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const OK_BODY: &str = r#"{"access_token":"tok123","refresh_token":"ref123","expires_in":300}"#;

    /// Replays canned results and records every request.
    #[derive(Default)]
    struct ScriptedHttp {
        replies: Mutex<VecDeque<std::result::Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedHttp {
        fn with(replies: Vec<std::result::Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<(String, String)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClaimHttp for ScriptedHttp {
        async fn post_json(
            &self,
            url: &str,
            body: &str,
        ) -> std::result::Result<HttpResponse, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), body.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Unavailable))
        }
    }

    fn client(http: Arc<ScriptedHttp>) -> (Arc<MemoryStore>, ClaimClient) {
        let kv = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(
            kv.clone(),
            MacAddress::new([0xAB, 0xCD, 0xEF, 0x12, 0x34, 0x56]),
        );
        let config = AuthConfig {
            base_url: "https://api.teddy.example".into(),
            ..AuthConfig::default()
        };
        (kv, ClaimClient::new(config, store, http))
    }

    // ==================== Request Tests ====================

    #[tokio::test]
    async fn test_claim_success_and_request_shape() {
        let http = ScriptedHttp::with(vec![Ok(HttpResponse::new(200, OK_BODY))]);
        let (_kv, client) = client(http.clone());

        let response = client.claim("child-001").await.unwrap();
        assert_eq!(response.access_token, "tok123");
        assert_eq!(response.expires_in, 300);

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        let (url, body) = &requests[0];
        assert_eq!(url, "https://api.teddy.example/api/v1/pair/claim");

        let sent: ClaimRequest = serde_json::from_str(body).unwrap();
        assert_eq!(sent.device_id, "ABCDEF123456");
        assert_eq!(sent.child_id, "child-001");
        assert_eq!(sent.firmware_version, env!("CARGO_PKG_VERSION"));

        let mut nonce = [0u8; NONCE_LEN];
        hex::decode_to_slice(&sent.nonce, &mut nonce).unwrap();
        let expected = compute_claim_hmac(
            &generate_oob_secret("ABCDEF123456"),
            "ABCDEF123456",
            "child-001",
            &nonce,
        );
        assert_eq!(sent.hmac, expected);
    }

    #[tokio::test]
    async fn test_stored_device_id_signs_request() {
        let http = ScriptedHttp::with(vec![Ok(HttpResponse::new(200, OK_BODY))]);
        let (kv, client) = client(http.clone());
        kv.set(NS_CREDENTIALS, KEY_DEVICE_ID, b"teddy-42").unwrap();
        client.claim("child-001").await.unwrap();

        let sent: ClaimRequest = serde_json::from_str(&http.requests()[0].1).unwrap();
        assert_eq!(sent.device_id, "teddy-42");

        let mut nonce = [0u8; NONCE_LEN];
        hex::decode_to_slice(&sent.nonce, &mut nonce).unwrap();
        let expected = compute_claim_hmac(
            &generate_oob_secret("teddy-42"),
            "teddy-42",
            "child-001",
            &nonce,
        );
        assert_eq!(sent.hmac, expected);
    }

    #[tokio::test]
    async fn test_fresh_nonce_per_attempt() {
        let http = ScriptedHttp::with(vec![
            Ok(HttpResponse::new(200, OK_BODY)),
            Ok(HttpResponse::new(200, OK_BODY)),
        ]);
        let (_kv, client) = client(http.clone());
        client.claim("child-001").await.unwrap();
        client.claim("child-001").await.unwrap();

        let requests = http.requests();
        let a: ClaimRequest = serde_json::from_str(&requests[0].1).unwrap();
        let b: ClaimRequest = serde_json::from_str(&requests[1].1).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.hmac, b.hmac);
    }

    // ==================== Status Tests ====================

    #[test]
    fn test_status_classification() {
        for status in [400, 401, 403, 422] {
            let err = parse_response(&HttpResponse::new(status, "{}")).unwrap_err();
            assert!(matches!(err, Error::Auth { status: s, .. } if s == status));
            assert!(!err.is_retryable());
        }
        assert!(parse_response(&HttpResponse::new(429, "")).unwrap_err().is_retryable());
        assert!(parse_response(&HttpResponse::new(503, "")).unwrap_err().is_retryable());

        let garbage = parse_response(&HttpResponse::new(200, "not json")).unwrap_err();
        assert!(matches!(
            garbage,
            Error::Transport(TransportError::InvalidResponse(_))
        ));
        assert!(!garbage.is_retryable());
    }

    #[test]
    fn test_auth_error_message_from_body() {
        let err = parse_response(&HttpResponse::new(401, r#"{"detail":"bad hmac"}"#)).unwrap_err();
        match err {
            Error::Auth { message, .. } => assert_eq!(message, "bad hmac"),
            other => panic!("unexpected {:?}", other),
        }
    }

    // ==================== Retry Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_not_retried() {
        let http = ScriptedHttp::with(vec![
            Ok(HttpResponse::new(401, r#"{"detail":"bad hmac"}"#)),
            Ok(HttpResponse::new(200, OK_BODY)),
        ]);
        let (_kv, client) = client(http.clone());

        let err = client.claim_with_retry("child-001").await.unwrap_err();
        assert!(matches!(err, Error::Auth { status: 401, .. }));
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried() {
        let http = ScriptedHttp::with(vec![
            Ok(HttpResponse::new(429, "")),
            Err(TransportError::Timeout),
            Ok(HttpResponse::new(200, OK_BODY)),
        ]);
        let (_kv, client) = client(http.clone());

        let start = tokio::time::Instant::now();
        let response = client.claim_with_retry("child-001").await.unwrap();
        assert_eq!(response.refresh_token, "ref123");
        assert_eq!(http.requests().len(), 3);

        // 1s and 2s nominal, each within ±25%
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(2250) && waited <= Duration::from_millis(3750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_bounded() {
        let http = ScriptedHttp::with(
            (0..10)
                .map(|_| Ok(HttpResponse::new(503, "")))
                .collect(),
        );
        let (_kv, client) = client(http.clone());

        let err = client.claim_with_retry("child-001").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(http.requests().len(), 5);
    }

    // ==================== Persistence Tests ====================

    #[tokio::test]
    async fn test_persist_artifacts() {
        let body = r#"{
            "access_token":"tok123","refresh_token":"ref123","expires_in":300,
            "pairing_code":"NEW-CODE",
            "provisioning_payload":{"room":"bedroom"},
            "device_config":{"ws_url":"wss://0.0.0.0:8443/ws"}
        }"#;
        let http = ScriptedHttp::with(vec![Ok(HttpResponse::new(200, body))]);
        let (_kv, client) = client(http);

        let response = client.claim("child-001").await.unwrap();
        client.persist_artifacts(&response).unwrap();

        let store = client.store();
        assert!(store.have_tokens());
        assert_eq!(
            store.load_refresh_token().unwrap().as_deref().map(String::as_str),
            Some("ref123")
        );
        assert_eq!(
            store.load_pairing_code().unwrap().as_deref().map(String::as_str),
            Some("NEW-CODE")
        );
        assert_eq!(
            store.load_provisioning_payload().unwrap(),
            Some(serde_json::json!({"room": "bedroom"}))
        );

        let config = store.load_device_config().unwrap().unwrap();
        let expected = if cfg!(feature = "plaintext-transport") {
            "ws://api.teddy.example:8443/ws"
        } else {
            "wss://api.teddy.example:8443/ws"
        };
        assert_eq!(config["ws_url"], expected);
    }

    #[tokio::test]
    async fn test_persist_reports_storage_failure() {
        let http = ScriptedHttp::with(vec![Ok(HttpResponse::new(200, OK_BODY))]);
        let (kv, client) = client(http);
        let response = client.claim("child-001").await.unwrap();

        kv.set_fail_writes(true);
        assert!(matches!(
            client.persist_artifacts(&response),
            Err(Error::Storage(_))
        ));
    }
}
