// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! This module defines the response envelope and the sanitized views shared
//! across the REST API. All types derive `Serialize`/`Deserialize` and
//! `ToSchema` for automatic JSON handling and OpenAPI documentation.
//!
//! ## Envelope
//!
//! Every response, success or failure, is wrapped as
//! `{"success": bool, "data"?: T, "error"?: string}`. The upstream KMS
//! speaks the same envelope, so the type is reused by the client side.
//!
//! ## Sanitized Views
//!
//! [`WalletView`] is the only wallet shape that leaves the service. It never
//! carries `dataEncryptingKey` or `encryptedPrivateKey`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::anonymize::{IdCodec, WALLET_PREFIX};
use crate::storage::{ListPage, WalletRecord};

/// Standard response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message, present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Wrap a payload in a success envelope.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Build a failure envelope with the given message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Wallet shape returned to API clients.
///
/// The address serializes as EIP-55 checksummed hex; the id is the opaque
/// `wlt-` identifier.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletView {
    /// Opaque wallet identifier.
    pub id: String,
    /// Human-readable wallet name.
    pub name: String,
    /// Checksummed Ethereum address.
    pub address: String,
    /// Creation instant.
    pub created: DateTime<Utc>,
    /// Last mutation instant.
    pub updated: DateTime<Utc>,
    /// Expiry instant, when scheduled for deletion.
    pub expires: Option<DateTime<Utc>>,
}

impl WalletView {
    /// Build the sanitized view of a stored wallet.
    pub fn from_record(record: &WalletRecord, codec: &IdCodec) -> Self {
        Self {
            id: codec.encode(WALLET_PREFIX, &record.id),
            name: record.name.clone(),
            address: record.address.to_checksum(None),
            created: record.created,
            updated: record.updated,
            expires: record.expires,
        }
    }
}

/// Paginated wallet listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletListView {
    /// Total number of wallets for the account.
    pub count: u64,
    /// Requested page of wallets.
    pub page: Vec<WalletView>,
}

impl WalletListView {
    /// Build the sanitized view of a wallet listing page.
    pub fn from_page(page: &ListPage<WalletRecord>, codec: &IdCodec) -> Self {
        Self {
            count: page.count,
            page: page
                .page
                .iter()
                .map(|w| WalletView::from_record(w, codec))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_skips_absent_fields() {
        let ok = serde_json::to_value(ApiResponse::ok(1u32)).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["data"], 1);
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(ApiResponse::<()>::failure("boom")).unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["error"], "boom");
        assert!(err.get("data").is_none());
    }

    #[test]
    fn envelope_round_trips() {
        let parsed: ApiResponse<Vec<u8>> =
            serde_json::from_str(r#"{"success":true,"data":[1,2,3]}"#).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.data.unwrap(), vec![1, 2, 3]);
        assert!(parsed.error.is_none());
    }
}
