//! ESP-IDF HTTPS transport.
//!
//! The ESP-IDF client is blocking, so each exchange runs on a blocking
//! worker thread and the async caller just awaits it. Server certificates
//! are checked against the ESP-IDF certificate bundle.

use super::http::{ClaimHttp, HttpResponse};
use crate::error::TransportError;
use async_trait::async_trait;
use embedded_svc::http::client::Client;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use log::debug;
use std::time::Duration;

/// Largest response body accepted from the claim endpoint.
const MAX_RESPONSE_LEN: usize = 8 * 1024;

/// `EspHttpConnection`-based [`ClaimHttp`].
#[derive(Debug, Clone)]
pub struct EspHttp {
    timeout: Duration,
}

impl EspHttp {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn connection_err(e: impl std::fmt::Debug) -> TransportError {
    TransportError::Connection(format!("{:?}", e))
}

fn post_blocking(url: &str, body: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
    let config = Configuration {
        timeout: Some(timeout),
        crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    let mut client = Client::wrap(EspHttpConnection::new(&config).map_err(connection_err)?);

    let content_length = body.len().to_string();
    let headers = [
        ("content-type", "application/json"),
        ("content-length", content_length.as_str()),
    ];
    let mut request = client.post(url, &headers).map_err(connection_err)?;
    request.write_all(body.as_bytes()).map_err(connection_err)?;
    request.flush().map_err(connection_err)?;

    let mut response = request.submit().map_err(connection_err)?;
    let status = response.status();

    let mut received = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = response.read(&mut buf).map_err(connection_err)?;
        if n == 0 {
            break;
        }
        if received.len() + n > MAX_RESPONSE_LEN {
            return Err(TransportError::InvalidResponse(format!(
                "response exceeds {} bytes",
                MAX_RESPONSE_LEN
            )));
        }
        received.extend_from_slice(&buf[..n]);
    }

    debug!("POST {} -> {} ({} bytes)", url, status, received.len());
    Ok(HttpResponse::new(status, received))
}

#[async_trait]
impl ClaimHttp for EspHttp {
    async fn post_json(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        let url = url.to_owned();
        let body = body.to_owned();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || post_blocking(&url, &body, timeout))
            .await
            .map_err(|e| TransportError::Connection(format!("HTTP worker failed: {}", e)))?
    }
}
