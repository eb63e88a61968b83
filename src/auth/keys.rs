// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault key material.
//!
//! A vault key is a high-entropy shared secret. Its SHA-256 fingerprint
//! (lowercase unpadded base32) routes requests across a multi-key set; the
//! secret itself never leaves the process and is used only as keying
//! material for the signature digest.
//!
//! The digest tuple is `SHA256(body || nonce || timestamp_bytes || key)`,
//! compared in constant time.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::error::AuthError;
use super::signature::{decode_base32, encode_base32, put_varint, VaultSignature, NONCE_LEN};

/// Minimum length for an auth secret (256-bit entropy floor).
pub const MIN_AUTH_SECRET_KEY_LENGTH: usize = 32;

/// Compute the signature digest over the canonical tuple.
fn signature_digest(secret: &[u8], data: &[u8], nonce: &[u8; NONCE_LEN], ts: &[u8; 8]) -> [u8; 32] {
    let mut hash = Sha256::new();
    hash.update(data);
    hash.update(nonce);
    hash.update(ts);
    hash.update(secret);
    hash.finalize().into()
}

/// Verify a parsed signature against a secret and the verifier clock.
fn verify_with_secret(
    secret: &[u8],
    now: DateTime<Utc>,
    data: &[u8],
    signature: &VaultSignature,
) -> Result<(), AuthError> {
    signature.check_window(now)?;
    let expected = signature_digest(secret, data, &signature.nonce, &signature.timestamp_bytes());
    if bool::from(expected.ct_eq(&signature.digest)) {
        Ok(())
    } else {
        Err(AuthError::InvalidSignature)
    }
}

/// Sign data with a secret at the given instant, using a fresh random nonce.
fn sign_with_secret(secret: &[u8], timestamp: DateTime<Utc>, data: &[u8]) -> VaultSignature {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ts = put_varint(timestamp.timestamp_micros());
    let digest = signature_digest(secret, data, &nonce, &ts);
    VaultSignature {
        nonce,
        timestamp,
        digest,
    }
}

/// A single vault key secret.
#[derive(Clone)]
pub struct VaultKey(String);

impl VaultKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// SHA-256 fingerprint of the secret.
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }

    /// Fingerprint as lowercase unpadded base32, the on-wire
    /// `X-Vault-Key-Hash` value.
    pub fn hash_string(&self) -> String {
        encode_base32(&self.hash())
    }

    /// Sign `data` at `timestamp` with a fresh random nonce.
    pub fn sign(&self, timestamp: DateTime<Utc>, data: &[u8]) -> VaultSignature {
        sign_with_secret(self.0.as_bytes(), timestamp, data)
    }

    /// Verify a signature over `data` against the verifier clock `now`.
    pub fn verify(
        &self,
        now: DateTime<Utc>,
        data: &[u8],
        signature: &VaultSignature,
    ) -> Result<(), AuthError> {
        verify_with_secret(self.0.as_bytes(), now, data, signature)
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The secret must never reach logs.
        write!(f, "VaultKey({})", self.hash_string())
    }
}

/// Ordered set of vault keys. The head signs outbound requests; inbound
/// requests select a key by fingerprint.
#[derive(Debug, Clone, Default)]
pub struct VaultKeyCollection(Vec<VaultKey>);

impl VaultKeyCollection {
    pub fn new(keys: Vec<VaultKey>) -> Self {
        Self(keys)
    }

    /// Build from the raw comma-separated secrets.
    pub fn from_secrets<S: AsRef<str>>(secrets: &[S]) -> Self {
        Self(
            secrets
                .iter()
                .map(|s| VaultKey::new(s.as_ref().trim()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The signing key for outbound requests.
    pub fn first(&self) -> Result<&VaultKey, AuthError> {
        self.0.first().ok_or(AuthError::NoVaultKeys)
    }

    /// Locate the key whose fingerprint matches the presented hash header.
    pub fn key_matching_hash(&self, hash: &str) -> Result<&VaultKey, AuthError> {
        let presented = decode_base32(hash).map_err(|_| AuthError::InvalidKeyHash)?;
        let presented: [u8; 32] = presented
            .try_into()
            .map_err(|_| AuthError::InvalidKeyHash)?;

        // Scan the whole set unconditionally so the lookup cost does not
        // depend on which key matches.
        let mut found: Option<&VaultKey> = None;
        for key in &self.0 {
            if bool::from(key.hash().ct_eq(&presented)) {
                found = found.or(Some(key));
            }
        }
        found.ok_or(AuthError::UnknownKey)
    }
}

/// Optional secondary HMAC secret protecting privileged endpoints.
#[derive(Clone)]
pub struct AuthSecretKey(String);

impl AuthSecretKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Enforce the minimum-length policy.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.0.chars().count() < MIN_AUTH_SECRET_KEY_LENGTH {
            Err(AuthError::WeakAuthSecret(MIN_AUTH_SECRET_KEY_LENGTH))
        } else {
            Ok(())
        }
    }

    /// Sign `data` at `timestamp` with a fresh random nonce.
    pub fn sign(&self, timestamp: DateTime<Utc>, data: &[u8]) -> VaultSignature {
        sign_with_secret(self.0.as_bytes(), timestamp, data)
    }

    /// Verify a signature over `data` against the verifier clock `now`.
    pub fn verify(
        &self,
        now: DateTime<Utc>,
        data: &[u8],
        signature: &VaultSignature,
    ) -> Result<(), AuthError> {
        verify_with_secret(self.0.as_bytes(), now, data, signature)
    }
}

impl std::fmt::Debug for AuthSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthSecretKey(..)")
    }
}
