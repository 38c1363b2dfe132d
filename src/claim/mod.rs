//! Device claim: HMAC proof of the OOB secret traded for a token pair.
//!
//! # Components
//!
//! - [`ClaimClient`] - builds, sends and retries claim requests
//! - [`proof`] - nonce generation and the HMAC-SHA256 proof
//! - [`ClaimHttp`] - HTTP capability (`ReqwestHttp` on host, `EspHttp` on ESP32)
//! - [`rewrite_device_config`] - fix-ups for server-issued device config

mod client;
mod device_config;
mod http;
pub mod proof;
mod types;

#[cfg(not(target_os = "espidf"))]
mod http_host;

#[cfg(feature = "esp32")]
mod http_esp;

pub use client::ClaimClient;
pub use device_config::rewrite_device_config;
pub use http::{ClaimHttp, HttpResponse};
pub use proof::{compute_claim_hmac, generate_nonce};
pub use types::{ClaimRequest, ClaimResponse};

#[cfg(not(target_os = "espidf"))]
pub use http_host::ReqwestHttp;

#[cfg(feature = "esp32")]
pub use http_esp::EspHttp;
