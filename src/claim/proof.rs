//! HMAC challenge/response proof for the claim request.
//!
//! ```text
//! hmac = HMAC-SHA256(key = OOB secret, msg = device_id ‖ child_id ‖ nonce)
//! ```
//!
//! The nonce enters the MAC as its 16 raw bytes and travels as 32 hex chars.

use crate::identity::OobSecret;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Claim nonce length in bytes.
pub const NONCE_LEN: usize = 16;

/// Fresh random nonce. Never reuse one across attempts.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Lower-case hex HMAC proving possession of the OOB secret.
pub fn compute_claim_hmac(
    secret: &OobSecret,
    device_id: &str,
    child_id: &str,
    nonce: &[u8; NONCE_LEN],
) -> String {
    hex::encode(claim_mac(secret.as_bytes(), device_id, child_id, nonce))
}

fn claim_mac(key: &[u8], device_id: &str, child_id: &str, nonce: &[u8]) -> [u8; 32] {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 takes keys of any length"),
    };
    mac.update(device_id.as_bytes());
    mac.update(child_id.as_bytes());
    mac.update(nonce);
    mac.finalize().into_bytes().into()
}
