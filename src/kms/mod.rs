// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Upstream KMS client.
//!
//! A thin wrapper over the remote key-management API. Two calls exist:
//!
//! - `POST /vault/encrypt` - wrap 32 random bytes into a new DEK
//! - `POST /vault/decrypt` - unwrap a DEK to its 32-byte plaintext
//!
//! Requests are signed with the head vault key (`X-Vault-Key-Hash` /
//! `X-Vault-Signature` over the serialized JSON body). Byte fields travel
//! as base64 strings inside the standard `{success, data, error}` envelope.
//! Failures propagate the upstream status code and message; there are no
//! internal retries.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::auth::middleware::{VAULT_KEY_HASH_HEADER, VAULT_SIGNATURE_HEADER};
use crate::auth::Authenticator;
use crate::error::ApiError;
use crate::models::ApiResponse;

/// Path prefix of the upstream API.
const API_PREFIX: &str = "/api/v1";

/// Outbound request timeout. The per-request future is dropped on client
/// disconnect; this bound only protects against a silently hung upstream.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Serde adapter carrying byte fields as standard base64 strings, the wire
/// form the upstream expects.
mod base64_bytes {
    use super::{Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize)]
struct EncryptRequest {
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

/// A DEK wrap as returned by `/vault/encrypt`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    /// Opaque handle naming the wrapping key inside the KMS.
    pub key_encrypting_key: String,
    /// Ciphertext of the 32-byte DEK.
    #[serde(with = "base64_bytes")]
    pub encrypted_data: Vec<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptRequest {
    key_encrypting_key: String,
    #[serde(with = "base64_bytes")]
    encrypted_data: Vec<u8>,
}

/// Client for the remote KMS.
#[derive(Debug, Clone)]
pub struct KmsClient {
    auth: Arc<Authenticator>,
    client: reqwest::Client,
    base_url: String,
}

impl KmsClient {
    /// Create a client against the given base URL (no trailing slash).
    pub fn new(auth: Arc<Authenticator>, base_url: impl Into<String>) -> Self {
        Self {
            auth,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to create HTTP client"),
            base_url: base_url.into(),
        }
    }

    /// Wrap `data` under a fresh KMS key.
    pub async fn encrypt(&self, data: &[u8]) -> Result<WrappedKey, ApiError> {
        self.post(
            "/vault/encrypt",
            &EncryptRequest {
                data: data.to_vec(),
            },
        )
        .await
    }

    /// Unwrap a DEK ciphertext back to its plaintext bytes.
    pub async fn decrypt(
        &self,
        key_encrypting_key: &str,
        encrypted_data: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, ApiError> {
        let plaintext: String = self
            .post(
                "/vault/decrypt",
                &DecryptRequest {
                    key_encrypting_key: key_encrypting_key.to_string(),
                    encrypted_data: encrypted_data.to_vec(),
                },
            )
            .await?;

        BASE64
            .decode(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| ApiError::upstream("kms returned malformed key material"))
    }

    /// Issue a signed POST and unwrap the response envelope.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
        B: Serialize,
    {
        let json = serde_json::to_vec(body)
            .map_err(|e| ApiError::internal(format!("failed to encode kms request: {e}")))?;
        let (key_hash, signature) = self
            .auth
            .sign_request(&json)
            .map_err(|e| ApiError::internal(e.to_string()))?;

        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        let response = self
            .client
            .post(&url)
            .header(VAULT_KEY_HASH_HEADER, key_hash)
            .header(VAULT_SIGNATURE_HEADER, signature)
            .header("content-type", "application/json")
            .body(json)
            .send()
            .await
            .map_err(|e| ApiError::upstream(format!("kms unreachable: {e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::upstream(format!("kms response truncated: {e}")))?;

        let envelope: ApiResponse<T> = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::upstream(format!("kms returned malformed response: {e}")))?;

        if !envelope.success {
            let message = envelope
                .error
                .unwrap_or_else(|| "unknown error".to_string());
            // Propagate the upstream status verbatim; a success status with
            // a failed envelope still reads as an upstream fault.
            let status = StatusCode::from_u16(status.as_u16())
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            return Err(ApiError::new(status, message));
        }

        envelope
            .data
            .ok_or_else(|| ApiError::upstream("kms response missing data"))
    }
}
