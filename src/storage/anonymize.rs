// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Anonymized identifier codec.
//!
//! Database-internal 12-byte ids are never exposed directly. Each id is
//! passed through an RC4 keystream under a process-wide key, base32-encoded
//! (lowercase, unpadded), and prefixed with its kind (`dek-`, `wlt-`). The
//! transform is deterministic and symmetric: identical ids encode
//! identically, and decoding is prefix-stripping plus the same keystream.
//!
//! This is obfuscation, not cryptographic anonymity; it prevents casual
//! enumeration of row identifiers across heterogeneous backends, nothing
//! more. The RC4 keystream is retained verbatim for compatibility with ids
//! issued by earlier deployments; the key length is arbitrary (1–256
//! bytes), which is why the cipher is implemented here rather than behind a
//! fixed-key-size API.

use crate::auth::signature::{decode_base32, encode_base32};
use crate::error::ApiError;

use super::ObjectId;

/// Kind prefix for data encrypting keys.
pub const DEK_PREFIX: &str = "dek";

/// Kind prefix for wallets.
pub const WALLET_PREFIX: &str = "wlt";

/// RC4 key schedule plus PRGA applied over `data`. One fresh cipher state
/// per value, matching the fixed-key, no-nonce transform.
fn rc4_apply(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut s: [u8; 256] = [0; 256];
    for (i, v) in s.iter_mut().enumerate() {
        *v = i as u8;
    }
    let mut j: u8 = 0;
    for i in 0..256 {
        j = j
            .wrapping_add(s[i])
            .wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }

    let mut out = Vec::with_capacity(data.len());
    let (mut i, mut j) = (0u8, 0u8);
    for &byte in data {
        i = i.wrapping_add(1);
        j = j.wrapping_add(s[i as usize]);
        s.swap(i as usize, j as usize);
        let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
        out.push(byte ^ k);
    }
    out
}

/// Two-way codec between internal ids and prefixed opaque strings.
#[derive(Debug, Clone)]
pub struct IdCodec {
    key: Vec<u8>,
}

impl IdCodec {
    /// Create a codec under the process anonymization key.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        assert!(
            !key.is_empty() && key.len() <= 256,
            "anonymization key must be 1-256 bytes"
        );
        Self { key }
    }

    /// Encode an internal id as `prefix-base32lc(keystream(id))`.
    pub fn encode(&self, prefix: &str, id: &ObjectId) -> String {
        let ciphertext = rc4_apply(&self.key, id);
        format!("{prefix}-{}", encode_base32(&ciphertext))
    }

    /// Decode a prefixed opaque string back to the internal id.
    pub fn decode(&self, prefix: &str, s: &str) -> Result<ObjectId, ApiError> {
        let encoded = s.strip_prefix(&format!("{prefix}-")).unwrap_or(s);
        let ciphertext =
            decode_base32(encoded).map_err(|_| ApiError::bad_request("invalid identifier"))?;
        let plaintext = rc4_apply(&self.key, &ciphertext);
        plaintext
            .try_into()
            .map_err(|_| ApiError::bad_request("invalid identifier"))
    }
}
