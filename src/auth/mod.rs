// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Request-body HMAC authentication for the vault API.
//!
//! ## Protocol
//!
//! 1. Client computes `SHA256(body || nonce || timestamp || key)` with a
//!    fresh 32-byte nonce and the current time
//! 2. Client sends `X-Vault-Key-Hash` (key fingerprint) and
//!    `X-Vault-Signature` (`nonce.timestamp.hmac`, base32)
//! 3. Server selects the vault key by fingerprint, checks the ±2 minute
//!    window, and recomputes the digest over the **raw body bytes**
//!
//! Replay defense is the window plus nonce randomness; nonces are not
//! tracked server-side.
//!
//! ## Privileged Endpoints
//!
//! When `VAULT_AUTH_SECRET_KEY` is configured, mutation endpoints such as
//! `/sign` additionally require `X-Vault-Auth-Signature` under the same
//! scheme keyed by the auth secret.

pub mod error;
pub mod keys;
pub mod middleware;
pub mod signature;

use chrono::Utc;

pub use error::AuthError;
pub use keys::{AuthSecretKey, VaultKey, VaultKeyCollection};
pub use signature::VaultSignature;

/// Holds the vault-key set and the optional auth secret. Initialized once at
/// startup and treated as immutable thereafter.
#[derive(Debug, Clone)]
pub struct Authenticator {
    vault_keys: VaultKeyCollection,
    auth_secret_key: Option<AuthSecretKey>,
}

impl Authenticator {
    /// Build from raw secrets. A configured-but-weak auth secret is kept,
    /// with a warning, matching long-standing deployment behavior.
    pub fn new<S: AsRef<str>>(vault_keys: &[S], auth_secret_key: Option<String>) -> Self {
        let auth_secret_key = auth_secret_key.map(AuthSecretKey::new);
        if let Some(secret) = &auth_secret_key {
            if let Err(err) = secret.validate() {
                tracing::warn!("{err}");
            }
        } else {
            tracing::warn!(
                "VAULT_AUTH_SECRET_KEY not configured. It is recommended for self-hosted vaults to configure this."
            );
        }

        Self {
            vault_keys: VaultKeyCollection::from_secrets(vault_keys),
            auth_secret_key,
        }
    }

    /// The configured vault-key set.
    pub fn vault_keys(&self) -> &VaultKeyCollection {
        &self.vault_keys
    }

    /// Verify the vault-key headers against the raw request body.
    pub fn verify_request(
        &self,
        key_hash: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), AuthError> {
        let key_hash = key_hash
            .filter(|h| !h.is_empty())
            .ok_or(AuthError::MissingKeyHash)?;
        let signature = signature
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSignature)?;

        let key = self.vault_keys.key_matching_hash(key_hash)?;
        let signature = VaultSignature::parse(signature)?;
        key.verify(Utc::now(), body, &signature)
    }

    /// Verify the optional auth-signature header against the raw request
    /// body. All four header × configuration states are covered:
    ///
    /// - header present, secret configured → verify
    /// - header present, no secret → reject
    /// - header absent, secret configured → reject
    /// - header absent, no secret → pass
    pub fn verify_auth_signature(
        &self,
        header: Option<&str>,
        body: &[u8],
    ) -> Result<(), AuthError> {
        let header = header.map(str::trim).filter(|h| !h.is_empty());
        match (header, &self.auth_secret_key) {
            (Some(_), None) => Err(AuthError::AuthSecretNotConfigured),
            (None, Some(_)) => Err(AuthError::AuthSignatureRequired),
            (None, None) => Ok(()),
            (Some(signature), Some(secret)) => {
                let signature = VaultSignature::parse(signature)?;
                secret.verify(Utc::now(), body, &signature)
            }
        }
    }

    /// Sign an outbound request body with the head vault key.
    ///
    /// Returns the `X-Vault-Key-Hash` and `X-Vault-Signature` values.
    pub fn sign_request(&self, body: &[u8]) -> Result<(String, String), AuthError> {
        let key = self.vault_keys.first()?;
        let signature = key.sign(Utc::now(), body);
        Ok((key.hash_string(), signature.encode()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> Authenticator {
        Authenticator::new(&["a".repeat(32), "b".repeat(32)], None)
    }

    #[test]
    fn outbound_signature_verifies_inbound() {
        let auth = authenticator();
        let body = br#"{"data":"aGVsbG8="}"#;

        let (key_hash, signature) = auth.sign_request(body).unwrap();
        assert!(auth
            .verify_request(Some(&key_hash), Some(&signature), body)
            .is_ok());
    }

    #[test]
    fn client_may_sign_with_any_configured_key() {
        let auth = authenticator();
        let second = VaultKey::new("b".repeat(32));
        let signature = second.sign(Utc::now(), b"{}").encode();

        assert!(auth
            .verify_request(Some(&second.hash_string()), Some(&signature), b"{}")
            .is_ok());
    }

    #[test]
    fn missing_headers_are_rejected() {
        let auth = authenticator();
        assert_eq!(
            auth.verify_request(None, Some("sig"), b""),
            Err(AuthError::MissingKeyHash)
        );
        assert_eq!(
            auth.verify_request(Some("hash"), None, b""),
            Err(AuthError::MissingSignature)
        );
        assert_eq!(
            auth.verify_request(Some(""), Some("sig"), b""),
            Err(AuthError::MissingKeyHash)
        );
    }

    #[test]
    fn auth_signature_state_table() {
        let without_secret = authenticator();
        let with_secret =
            Authenticator::new(&["a".repeat(32)], Some("s".repeat(32)));
        let secret = AuthSecretKey::new("s".repeat(32));
        let signature = secret.sign(Utc::now(), b"{}").encode();

        // header absent, no secret → pass
        assert!(without_secret.verify_auth_signature(None, b"{}").is_ok());
        // header present, no secret → reject
        assert_eq!(
            without_secret.verify_auth_signature(Some(&signature), b"{}"),
            Err(AuthError::AuthSecretNotConfigured)
        );
        // header absent, secret configured → reject
        assert_eq!(
            with_secret.verify_auth_signature(None, b"{}"),
            Err(AuthError::AuthSignatureRequired)
        );
        // header present, secret configured → verify
        assert!(with_secret
            .verify_auth_signature(Some(&signature), b"{}")
            .is_ok());
        // signature keyed by a vault key instead of the auth secret fails
        let wrong = VaultKey::new("a".repeat(32)).sign(Utc::now(), b"{}").encode();
        assert_eq!(
            with_secret.verify_auth_signature(Some(&wrong), b"{}"),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn empty_body_signs_as_zero_length_input() {
        let auth = authenticator();
        let (key_hash, signature) = auth.sign_request(b"").unwrap();
        assert!(auth
            .verify_request(Some(&key_hash), Some(&signature), b"")
            .is_ok());
        // The same signature does not cover a different body.
        assert!(auth
            .verify_request(Some(&key_hash), Some(&signature), b"{}")
            .is_err());
    }
}
