// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Every variant carries enough detail for the log line, but the HTTP
//! response is deliberately uniform: a 401 with a generic message. An
//! attacker probing the endpoint cannot distinguish an unknown key from an
//! expired signature from a digest mismatch.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::models::ApiResponse;

/// Authentication failure raised while verifying the vault-key or
/// auth-signature headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// `X-Vault-Key-Hash` header not provided.
    MissingKeyHash,
    /// `X-Vault-Signature` header not provided.
    MissingSignature,
    /// Key hash header did not decode to 32 bytes.
    InvalidKeyHash,
    /// No configured vault key matches the presented hash.
    UnknownKey,
    /// Signature did not parse as the dotted base32 triplet.
    MalformedSignature(String),
    /// Signature timestamp is more than the allowed window in the past.
    Expired,
    /// Signature timestamp is more than the allowed window in the future.
    NotYetValid,
    /// Recomputed digest did not match.
    InvalidSignature,
    /// No vault keys configured at all.
    NoVaultKeys,
    /// `X-Vault-Auth-Signature` presented but no auth secret is configured.
    AuthSecretNotConfigured,
    /// Auth secret configured but `X-Vault-Auth-Signature` is missing.
    AuthSignatureRequired,
    /// Auth secret fails the minimum-length policy.
    WeakAuthSecret(usize),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingKeyHash => write!(f, "X-Vault-Key-Hash header not provided"),
            AuthError::MissingSignature => write!(f, "X-Vault-Signature header not provided"),
            AuthError::InvalidKeyHash => write!(f, "invalid vault key hash"),
            AuthError::UnknownKey => write!(f, "vault key for hash not configured"),
            AuthError::MalformedSignature(detail) => write!(f, "invalid signature: {detail}"),
            AuthError::Expired => write!(f, "signature expired"),
            AuthError::NotYetValid => write!(f, "signature not yet valid"),
            AuthError::InvalidSignature => write!(f, "invalid signature for data"),
            AuthError::NoVaultKeys => write!(
                f,
                "could not find a vault key, have you configured the VAULT_KEY environment variable?"
            ),
            AuthError::AuthSecretNotConfigured => write!(
                f,
                "VAULT_AUTH_SECRET_KEY not configured, X-Vault-Auth-Signature not supported"
            ),
            AuthError::AuthSignatureRequired => write!(
                f,
                "VAULT_AUTH_SECRET_KEY configured, required X-Vault-Auth-Signature not provided"
            ),
            AuthError::WeakAuthSecret(min) => write!(
                f,
                "VAULT_AUTH_SECRET_KEY is too short, must be at least {min} characters"
            ),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::failure("unauthenticated")),
        )
            .into_response()
    }
}
