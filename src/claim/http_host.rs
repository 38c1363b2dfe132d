//! Host HTTPS transport backed by `reqwest` (rustls).

use super::http::{ClaimHttp, HttpResponse};
use crate::error::TransportError;
use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// `reqwest`-based [`ClaimHttp`] for development machines.
#[derive(Debug, Clone)]
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    /// Build a client with an overall per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .user_agent(concat!("teddy-auth-esp32/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_decode() || e.is_body() {
        TransportError::InvalidResponse(e.to_string())
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[async_trait]
impl ClaimHttp for ReqwestHttp {
    async fn post_json(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(classify)?;
        debug!("POST {} -> {} ({} bytes)", url, status, bytes.len());
        Ok(HttpResponse::new(status, bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::mpsc;
    use std::thread;

    /// Serve one request with `status`/`body`, reporting the request path and
    /// body back through the channel.
    fn one_shot_server(
        status: u16,
        body: &'static str,
    ) -> (String, mpsc::Receiver<(String, String)>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            if let Ok(mut request) = server.recv() {
                let mut received = String::new();
                let _ = request.as_reader().read_to_string(&mut received);
                let _ = tx.send((request.url().to_string(), received));
                let response = tiny_http::Response::from_string(body).with_status_code(status);
                let _ = request.respond(response);
            }
        });

        (format!("http://{}", addr), rx)
    }

    #[tokio::test]
    async fn test_post_json_round_trip() {
        let (base, rx) = one_shot_server(200, r#"{"ok":true}"#);
        let http = ReqwestHttp::new(Duration::from_secs(5)).unwrap();

        let response = http
            .post_json(&format!("{}/api/v1/pair/claim", base), r#"{"device_id":"X"}"#)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"ok":true}"#.to_vec());
        let (path, body) = rx.recv().unwrap();
        assert_eq!(path, "/api/v1/pair/claim");
        assert_eq!(body, r#"{"device_id":"X"}"#);
    }

    #[tokio::test]
    async fn test_error_status_is_not_transport_error() {
        let (base, _rx) = one_shot_server(429, "slow down");
        let http = ReqwestHttp::new(Duration::from_secs(5)).unwrap();

        let response = http.post_json(&base, "{}").await.unwrap();
        assert_eq!(response.status, 429);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let http = ReqwestHttp::new(Duration::from_secs(5)).unwrap();

        let err = http
            .post_json(&format!("http://127.0.0.1:{}/", port), "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
        assert!(err.is_retryable());
    }
}
