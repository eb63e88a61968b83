// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account status endpoint.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::state::AppState;

/// Deployment and account summary.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Number of configured vault keys.
    pub vault_keys: usize,
    /// Number of live wallets for the account.
    pub wallets: u64,
    /// Service version.
    pub version: String,
}

/// Summarize the deployment for an account.
#[utoipa::path(
    get,
    path = "/api/v1/accounts/{account}/status",
    tag = "Status",
    params(("account" = String, Path, description = "Account identifier")),
    responses(
        (status = 200, description = "Status summary", body = StatusResponse),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn status(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<ApiResponse<StatusResponse>>, ApiError> {
    let wallets = state.vault.list_wallets(&account, 0, 0).await?;

    Ok(Json(ApiResponse::ok(StatusResponse {
        vault_keys: state.auth.vault_keys().len(),
        wallets: wallets.count,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })))
}
