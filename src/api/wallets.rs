// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet management API endpoints.
//!
//! Creation, retrieval, listing, renaming, and TTL scheduling. Every
//! endpoint requires vault-key authentication, applied as router middleware.
//! Responses carry only the sanitized [`WalletView`].

use alloy::primitives::Address;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::{ApiResponse, WalletListView, WalletView};
use crate::state::AppState;

/// Parse a path address, hex with or without the `0x` prefix.
pub fn parse_address(s: &str) -> Result<Address, ApiError> {
    crate::signer::abi::parse_address(s)
        .ok_or_else(|| ApiError::bad_request(format!("invalid wallet address: {s}")))
}

/// Request to create a new wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWalletRequest {
    /// Human-readable wallet name.
    pub name: String,
}

/// Request to rename a wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateWalletRequest {
    /// New wallet name.
    pub name: String,
}

/// Request to schedule a wallet for deletion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExpireWalletRequest {
    /// Time to live, in seconds.
    pub ttl: u64,
}

/// Pagination query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    /// Rows to skip.
    pub offset: Option<u64>,
    /// Page size.
    pub count: Option<u64>,
}

/// Create a wallet for the account.
///
/// Generates a secp256k1 keypair, seals the private key under a shared DEK,
/// and persists the row. The private key never leaves the service.
#[utoipa::path(
    post,
    path = "/api/v1/accounts/{account}/wallets",
    tag = "Wallets",
    params(("account" = String, Path, description = "Account identifier")),
    request_body = CreateWalletRequest,
    responses(
        (status = 200, description = "Wallet created", body = WalletView),
        (status = 401, description = "Unauthenticated"),
        (status = 502, description = "KMS unreachable")
    )
)]
pub async fn create_wallet(
    State(state): State<AppState>,
    Path(account): Path<String>,
    request: Result<Json<CreateWalletRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<WalletView>>, ApiError> {
    let Json(request) = request?;
    let record = state.vault.create_wallet(&account, &request.name).await?;
    tracing::info!(account = %account, address = %record.address, "created wallet");
    Ok(Json(ApiResponse::ok(WalletView::from_record(
        &record,
        &state.id_codec,
    ))))
}

/// Fetch a wallet by address.
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{account}/wallets/{address}",
    tag = "Wallets",
    params(
        ("account" = String, Path, description = "Account identifier"),
        ("address" = String, Path, description = "Wallet address, hex")
    ),
    responses(
        (status = 200, description = "Wallet", body = WalletView),
        (status = 401, description = "Unauthenticated"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    Path((account, address)): Path<(String, String)>,
) -> Result<Json<ApiResponse<WalletView>>, ApiError> {
    let address = parse_address(&address)?;
    let record = state.vault.get_wallet(&account, address).await?;
    Ok(Json(ApiResponse::ok(WalletView::from_record(
        &record,
        &state.id_codec,
    ))))
}

/// List the account's wallets.
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{account}/wallets",
    tag = "Wallets",
    params(
        ("account" = String, Path, description = "Account identifier"),
        ("offset" = Option<u64>, Query, description = "Rows to skip"),
        ("count" = Option<u64>, Query, description = "Page size")
    ),
    responses(
        (status = 200, description = "Wallet page", body = WalletListView),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn list_wallets(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<WalletListView>>, ApiError> {
    let page = state
        .vault
        .list_wallets(
            &account,
            query.offset.unwrap_or(0),
            query.count.unwrap_or(100),
        )
        .await?;
    Ok(Json(ApiResponse::ok(WalletListView::from_page(
        &page,
        &state.id_codec,
    ))))
}

/// Rename a wallet.
#[utoipa::path(
    put,
    path = "/api/v1/accounts/{account}/wallets/{address}",
    tag = "Wallets",
    params(
        ("account" = String, Path, description = "Account identifier"),
        ("address" = String, Path, description = "Wallet address, hex")
    ),
    request_body = UpdateWalletRequest,
    responses(
        (status = 200, description = "Updated wallet", body = WalletView),
        (status = 401, description = "Unauthenticated"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn update_wallet(
    State(state): State<AppState>,
    Path((account, address)): Path<(String, String)>,
    request: Result<Json<UpdateWalletRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<WalletView>>, ApiError> {
    let Json(request) = request?;
    let address = parse_address(&address)?;
    let record = state
        .vault
        .update_wallet(&account, address, &request.name)
        .await?;
    Ok(Json(ApiResponse::ok(WalletView::from_record(
        &record,
        &state.id_codec,
    ))))
}

/// Schedule a wallet for deletion after a TTL.
#[utoipa::path(
    post,
    path = "/api/v1/accounts/{account}/wallets/{address}/expire",
    tag = "Wallets",
    params(
        ("account" = String, Path, description = "Account identifier"),
        ("address" = String, Path, description = "Wallet address, hex")
    ),
    request_body = ExpireWalletRequest,
    responses(
        (status = 200, description = "Expiring wallet", body = WalletView),
        (status = 401, description = "Unauthenticated"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn expire_wallet(
    State(state): State<AppState>,
    Path((account, address)): Path<(String, String)>,
    request: Result<Json<ExpireWalletRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<WalletView>>, ApiError> {
    let Json(request) = request?;
    let address = parse_address(&address)?;
    let ttl = chrono::Duration::seconds(request.ttl as i64);
    let record = state.vault.expire_wallet(&account, address, ttl).await?;
    tracing::info!(account = %account, address = %record.address, ttl = request.ttl, "scheduled wallet expiry");
    Ok(Json(ApiResponse::ok(WalletView::from_record(
        &record,
        &state.id_codec,
    ))))
}

/// Clear a wallet's scheduled deletion.
#[utoipa::path(
    post,
    path = "/api/v1/accounts/{account}/wallets/{address}/unexpire",
    tag = "Wallets",
    params(
        ("account" = String, Path, description = "Account identifier"),
        ("address" = String, Path, description = "Wallet address, hex")
    ),
    responses(
        (status = 200, description = "Restored wallet", body = WalletView),
        (status = 401, description = "Unauthenticated"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn unexpire_wallet(
    State(state): State<AppState>,
    Path((account, address)): Path<(String, String)>,
) -> Result<Json<ApiResponse<WalletView>>, ApiError> {
    let address = parse_address(&address)?;
    let record = state.vault.unexpire_wallet(&account, address).await?;
    Ok(Json(ApiResponse::ok(WalletView::from_record(
        &record,
        &state.id_codec,
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parsing_accepts_both_prefix_forms() {
        let bare = "7E5F4552091A69125d5DfCb7b8C2659029395Bdf";
        let prefixed = format!("0x{bare}");
        assert_eq!(
            parse_address(bare).unwrap(),
            parse_address(&prefixed).unwrap()
        );
        assert!(parse_address("nonsense").is_err());
        assert!(parse_address("0x1234").is_err());
    }
}
