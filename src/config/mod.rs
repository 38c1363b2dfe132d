//! Runtime configuration for the authentication core.
//!
//! # Components
//!
//! - [`AuthConfig`] - claim endpoint, retry/backoff policy, refresh timing
//! - [`wifi`] - WiFi credential types delivered by provisioning
//!
//! Defaults mirror the device's production constants. Host builds may
//! override them through environment variables (see [`AuthConfig::from_env`]);
//! ESP32 builds bake the API base URL in at compile time.

mod wifi;

pub use wifi::{ConfigError, WifiConfig, MAX_PASSWORD_LEN, MAX_SSID_LEN, MIN_PASSWORD_LEN};

use crate::error::{Error, ValidationError};
use std::time::Duration;

/// Production API used when nothing overrides it.
pub const DEFAULT_BASE_URL: &str = "https://api.teddy.example";

/// Path of the claim endpoint, appended to the base URL.
pub const CLAIM_PATH: &str = "/api/v1/pair/claim";

/// Environment variable overriding the base URL.
pub const BASE_URL_ENV: &str = "TEDDY_API_BASE_URL";

/// Compile-time base URL for firmware images.
const BUILD_BASE_URL: Option<&str> = option_env!("TEDDY_API_BASE_URL");

/// Settings shared by the claim client, token manager and provisioning session.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    /// Scheme + host (+ port) of the pairing API, without trailing slash.
    pub base_url: String,
    /// Reported to the server in every claim request.
    pub firmware_version: String,
    /// False on builds without TLS; server URLs are downgraded to match.
    pub tls_enabled: bool,
    /// Upper bound for one HTTP exchange.
    pub http_timeout: Duration,
    /// Claim attempts before giving up on retryable failures.
    pub claim_max_attempts: u32,
    /// Consecutive refresh failures tolerated before the token is dropped.
    pub refresh_max_retries: u32,
    /// First backoff delay.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
    /// Relative jitter applied to each delay (0.25 = ±25%).
    pub backoff_jitter: f32,
    /// Refresh this long before expiry.
    pub refresh_buffer: Duration,
    /// Tokens are treated as expired this long before their real expiry.
    pub validity_margin: Duration,
    /// How long to wait for `auth/ok` or `auth/error` after sending a refresh.
    pub refresh_response_timeout: Duration,
    /// Hard limit on a BLE provisioning session.
    pub provisioning_timeout: Duration,
    /// Failed packets accepted before the provisioning session is abandoned.
    pub provisioning_max_failures: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: BUILD_BASE_URL.unwrap_or(DEFAULT_BASE_URL).to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            tls_enabled: cfg!(not(feature = "plaintext-transport")),
            http_timeout: Duration::from_secs(15),
            claim_max_attempts: 5,
            refresh_max_retries: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            backoff_jitter: 0.25,
            refresh_buffer: Duration::from_secs(60),
            validity_margin: Duration::from_secs(30),
            refresh_response_timeout: Duration::from_secs(30),
            provisioning_timeout: Duration::from_secs(600),
            provisioning_max_failures: 5,
        }
    }
}

impl AuthConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Recognized variables: `TEDDY_API_BASE_URL`.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            log::info!("Using API base URL from {}", BASE_URL_ENV);
            config.base_url = url;
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    /// Full URL of the claim endpoint.
    pub fn claim_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), CLAIM_PATH)
    }

    /// Host portion of the base URL (no scheme, port or path).
    pub fn api_host(&self) -> &str {
        let without_scheme = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
        authority.split(':').next().unwrap_or(authority)
    }

    /// Reject settings that would break the auth lifecycle.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: &str| Err(Error::Validation(ValidationError::Malformed(msg.into())));

        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return invalid("base_url must start with http:// or https://");
        }
        if self.api_host().is_empty() {
            return invalid("base_url has no host");
        }
        if self.claim_max_attempts == 0 {
            return invalid("claim_max_attempts must be at least 1");
        }
        if self.backoff_base.is_zero() || self.backoff_cap < self.backoff_base {
            return invalid("backoff_cap must be >= backoff_base > 0");
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return invalid("backoff_jitter must be in [0, 1)");
        }
        if self.refresh_buffer < self.validity_margin {
            return invalid("refresh_buffer must not be shorter than validity_margin");
        }
        if self.provisioning_timeout.is_zero() {
            return invalid("provisioning_timeout must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AuthConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.refresh_buffer, Duration::from_secs(60));
        assert_eq!(config.validity_margin, Duration::from_secs(30));
        assert_eq!(config.provisioning_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_claim_url() {
        let config = AuthConfig {
            base_url: "https://api.example.com/".into(),
            ..AuthConfig::default()
        };
        assert_eq!(config.claim_url(), "https://api.example.com/api/v1/pair/claim");
    }

    #[test]
    fn test_api_host() {
        let mut config = AuthConfig {
            base_url: "http://192.168.1.20:8000".into(),
            ..AuthConfig::default()
        };
        assert_eq!(config.api_host(), "192.168.1.20");

        config.base_url = "https://api.example.com/v2".into();
        assert_eq!(config.api_host(), "api.example.com");
    }

    #[test]
    fn test_rejects_bad_settings() {
        let bad_url = AuthConfig {
            base_url: "ftp://x".into(),
            ..AuthConfig::default()
        };
        assert!(bad_url.validate().is_err());

        let no_attempts = AuthConfig {
            claim_max_attempts: 0,
            ..AuthConfig::default()
        };
        assert!(no_attempts.validate().is_err());

        let short_buffer = AuthConfig {
            refresh_buffer: Duration::from_secs(10),
            ..AuthConfig::default()
        };
        assert!(short_buffer.validate().is_err());

        let jitter = AuthConfig {
            backoff_jitter: 1.5,
            ..AuthConfig::default()
        };
        assert!(jitter.validate().is_err());
    }
}
