// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Application State
//!
//! Shared handles passed to every Axum request handler via the `State`
//! extractor. All fields are `Arc`s; `AppState` is cheap to clone and
//! `Send + Sync`. The vault key set and auth secret inside
//! [`Authenticator`] are initialized once at startup and immutable
//! thereafter.

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::signer::Signer;
use crate::storage::anonymize::IdCodec;
use crate::vault::Vault;

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Vault key set and optional auth secret.
    pub auth: Arc<Authenticator>,
    /// Envelope-encryption core.
    pub vault: Arc<Vault>,
    /// Method-call signer with its key cache.
    pub signer: Arc<Signer>,
    /// Identifier obfuscation codec.
    pub id_codec: Arc<IdCodec>,
}

impl AppState {
    pub fn new(
        auth: Arc<Authenticator>,
        vault: Arc<Vault>,
        signer: Arc<Signer>,
        id_codec: Arc<IdCodec>,
    ) -> Self {
        Self {
            auth,
            vault,
            signer,
            id_codec,
        }
    }
}
