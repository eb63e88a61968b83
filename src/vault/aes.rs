// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM sealing for private key material.
//!
//! Wire format: a fresh 12-byte nonce prepended to the ciphertext (which
//! carries the GCM tag). The 96-bit nonce is randomly generated per seal;
//! each DEK seals at most one private key per wallet, far below the random
//! nonce collision bound.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::ApiError;

/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// Encrypt `plaintext` under a 32-byte key. Returns `nonce || ciphertext`.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, ApiError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| ApiError::internal("invalid data encrypting key"))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ApiError::internal("private key encryption failed"))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a `nonce || ciphertext` blob under a 32-byte key.
pub fn open(key: &[u8], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, ApiError> {
    if sealed.len() < NONCE_LEN {
        return Err(ApiError::internal("private key ciphertext truncated"));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| ApiError::internal("invalid data encrypting key"))?;

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| ApiError::internal("private key decryption failed"))
}
