//! Persisted token record.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The bearer token together with its absolute expiry and the identity it
/// was issued to. Stored in the `tokens` namespace; `expiry` as u32 LE.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TokenRecord {
    pub token: String,
    /// Unix seconds.
    pub expiry: u32,
    pub device_id: String,
    pub child_id: String,
}

impl TokenRecord {
    /// True if the token is non-empty and `now` is more than `margin`
    /// seconds before expiry.
    pub fn is_valid_at(&self, now: u32, margin: u32) -> bool {
        !self.token.is_empty() && u64::from(now) + u64::from(margin) < u64::from(self.expiry)
    }

    /// Seconds left until expiry (0 once expired).
    pub fn remaining(&self, now: u32) -> u32 {
        self.expiry.saturating_sub(now)
    }

    /// Short proof sent with refresh requests: the last 8 characters.
    pub fn proof(&self) -> &str {
        token_proof(&self.token)
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token", &format_args!("...{}", token_tail(&self.token)))
            .field("expiry", &self.expiry)
            .field("device_id", &self.device_id)
            .field("child_id", &self.child_id)
            .finish()
    }
}

/// Last 8 characters of a token (the whole token if shorter).
pub fn token_proof(token: &str) -> &str {
    tail(token, 8)
}

/// Last 4 characters, for log lines.
pub(crate) fn token_tail(token: &str) -> &str {
    tail(token, 4)
}

fn tail(s: &str, n: usize) -> &str {
    let start = s
        .char_indices()
        .rev()
        .nth(n.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    &s[start..]
}

pub(crate) fn encode_expiry(expiry: u32) -> [u8; 4] {
    expiry.to_le_bytes()
}

pub(crate) fn decode_expiry(bytes: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_le_bytes(arr))
}
