//! Encrypted provisioning packet.
//!
//! Wire format, written to the provisioning characteristic in one piece:
//!
//! ```text
//! [nonce: 12][tag: 16][ciphertext: N]
//! ```
//!
//! The total size must be within `[28, 512]`. The ciphertext is AES-256-GCM
//! under the Proof-of-Possession key with no associated data, tag detached.

use crate::error::Error;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const HEADER_LEN: usize = NONCE_LEN + TAG_LEN;

/// Largest packet accepted (one BLE write at MTU >= 247 with long writes).
pub const MAX_PACKET_LEN: usize = 512;

/// PoP key length (AES-256).
pub const POP_KEY_LEN: usize = 32;

/// Proof-of-Possession key. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PopKey([u8; POP_KEY_LEN]);

impl PopKey {
    pub const fn new(bytes: [u8; POP_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Accepts exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; POP_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Parse the 64-char hex form.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; POP_KEY_LEN];
        hex::decode_to_slice(s.trim(), &mut bytes).ok()?;
        Some(Self(bytes))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for PopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PopKey(<redacted>)")
    }
}

/// A size-checked packet borrowed from the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct ProvisioningPacket<'a> {
    pub nonce: &'a [u8; NONCE_LEN],
    pub tag: &'a [u8; TAG_LEN],
    pub ciphertext: &'a [u8],
}

impl<'a> ProvisioningPacket<'a> {
    /// Split a raw write into its fields.
    ///
    /// Rejects anything outside `[28, 512]` bytes with `Error::Protocol`
    /// before any other work is done.
    pub fn parse(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() < HEADER_LEN || data.len() > MAX_PACKET_LEN {
            return Err(Error::Protocol(format!(
                "packet length {} outside {}..={}",
                data.len(),
                HEADER_LEN,
                MAX_PACKET_LEN
            )));
        }
        let (nonce, rest) = data.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);
        Ok(Self {
            nonce: nonce
                .try_into()
                .map_err(|_| Error::Protocol("nonce".into()))?,
            tag: tag.try_into().map_err(|_| Error::Protocol("tag".into()))?,
            ciphertext,
        })
    }

    /// Total wire length.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.ciphertext.len()
    }
}

/// Decrypt and authenticate a packet.
///
/// The output buffer is exactly ciphertext-sized (GCM does not expand). On a
/// tag mismatch the buffer is wiped and dropped; no plaintext escapes.
pub fn open_packet(
    key: &PopKey,
    packet: &ProvisioningPacket<'_>,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut buf = Zeroizing::new(packet.ciphertext.to_vec());
    key.cipher()
        .decrypt_in_place_detached(
            Nonce::from_slice(packet.nonce),
            b"",
            buf.as_mut_slice(),
            Tag::from_slice(packet.tag),
        )
        .map_err(|_| Error::Crypto("authentication tag mismatch".into()))?;
    Ok(buf)
}

/// Encrypt `plaintext` into a wire packet.
pub fn seal_packet(
    key: &PopKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, Error> {
    if HEADER_LEN + plaintext.len() > MAX_PACKET_LEN {
        return Err(Error::Protocol(format!(
            "plaintext of {} bytes does not fit in a packet",
            plaintext.len()
        )));
    }

    let mut body = plaintext.to_vec();
    let tag = key
        .cipher()
        .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", &mut body)
        .map_err(|_| Error::Crypto("encryption failed".into()))?;

    let mut packet = Vec::with_capacity(HEADER_LEN + body.len());
    packet.extend_from_slice(nonce);
    packet.extend_from_slice(&tag);
    packet.extend_from_slice(&body);
    body.zeroize();
    Ok(packet)
}
