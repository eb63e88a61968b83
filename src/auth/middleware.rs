// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Signatures cover the **raw body bytes**, so both middleware functions
//! buffer the body up front, verify against the exact bytes received, and
//! rebuild the request from the same buffer. Handlers downstream therefore
//! parse precisely what was verified.

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the vault key fingerprint.
pub const VAULT_KEY_HASH_HEADER: &str = "x-vault-key-hash";

/// Header carrying the request signature.
pub const VAULT_SIGNATURE_HEADER: &str = "x-vault-signature";

/// Header carrying the privileged-endpoint signature.
pub const VAULT_AUTH_SIGNATURE_HEADER: &str = "x-vault-auth-signature";

/// Upper bound on buffered request bodies.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn buffer_body(request: Request) -> Result<(axum::http::request::Parts, Bytes), Response> {
    let (parts, body) = request.into_parts();
    match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => Ok((parts, bytes)),
        Err(_) => Err(ApiError::bad_request("unable to read request body").into_response()),
    }
}

/// Require a valid `X-Vault-Key-Hash` / `X-Vault-Signature` pair.
///
/// Applied to every route of the API.
pub async fn require_vault_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.auth.vault_keys().is_empty() {
        tracing::warn!("no VAULT_KEY configured, please follow online documentation");
    }

    let (parts, bytes) = match buffer_body(request).await {
        Ok(buffered) => buffered,
        Err(response) => return response,
    };

    let key_hash = header(&parts.headers, VAULT_KEY_HASH_HEADER);
    let signature = header(&parts.headers, VAULT_SIGNATURE_HEADER);

    if let Err(err) = state.auth.verify_request(key_hash, signature, &bytes) {
        tracing::warn!(
            path = %parts.uri.path(),
            error = %err,
            "rejected request with invalid vault signature"
        );
        return err.into_response();
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    next.run(request).await
}

/// Require a valid `X-Vault-Auth-Signature` when the server is configured
/// with an auth secret.
///
/// Applied to privileged mutation routes in addition to
/// [`require_vault_key`].
pub async fn require_auth_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, bytes) = match buffer_body(request).await {
        Ok(buffered) => buffered,
        Err(response) => return response,
    };

    let auth_signature = header(&parts.headers, VAULT_AUTH_SIGNATURE_HEADER);

    if let Err(err) = state.auth.verify_auth_signature(auth_signature, &bytes) {
        tracing::warn!(
            path = %parts.uri.path(),
            error = %err,
            "rejected request with invalid auth signature"
        );
        return err.into_response();
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    next.run(request).await
}
