// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Method-call signing endpoint.
//!
//! The privileged endpoint of the API: in addition to the vault key, it
//! requires `X-Vault-Auth-Signature` whenever the server is configured with
//! an auth secret.

use alloy::primitives::Address;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::state::AppState;

use super::wallets::parse_address;

/// Request to sign a method call.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignRequest {
    /// Address that will submit the call on-chain.
    #[schema(value_type = String)]
    pub sender: Address,
    /// Caller-provided 32-byte domain separator, hex.
    pub uniq: String,
    /// Single JSON ABI fragment describing the method.
    #[schema(value_type = Object)]
    pub abi: serde_json::Value,
    /// Method arguments.
    #[schema(value_type = Vec<Object>)]
    pub args: Vec<serde_json::Value>,
}

/// Sign a method call with the wallet at `address`.
///
/// Returns the original arguments with `{nonce, r, s, v}` appended.
#[utoipa::path(
    post,
    path = "/api/v1/accounts/{account}/wallets/{address}/sign",
    tag = "Signing",
    params(
        ("account" = String, Path, description = "Account identifier"),
        ("address" = String, Path, description = "Signer wallet address, hex")
    ),
    request_body = SignRequest,
    responses(
        (status = 200, description = "Signed arguments"),
        (status = 400, description = "Malformed ABI or arguments"),
        (status = 401, description = "Unauthenticated"),
        (status = 404, description = "Wallet not found"),
        (status = 502, description = "KMS unreachable")
    )
)]
pub async fn sign(
    State(state): State<AppState>,
    Path((account, address)): Path<(String, String)>,
    request: Result<Json<SignRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<Vec<serde_json::Value>>>, ApiError> {
    let Json(request) = request?;
    let signer = parse_address(&address)?;
    let result = state
        .signer
        .sign(
            &account,
            request.sender,
            &request.uniq,
            signer,
            &request.abi,
            &request.args,
        )
        .await?;
    tracing::info!(account = %account, signer = %signer, "signed method call");
    Ok(Json(ApiResponse::ok(result)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_request_decodes_wire_shape() {
        let request: SignRequest = serde_json::from_str(
            r#"{
                "sender": "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
                "uniq": "0xabc0000000000000000000000000000000000000000000000000000000000000",
                "abi": {"name": "foo", "type": "function", "inputs": []},
                "args": ["0x1", "0x"]
            }"#,
        )
        .unwrap();
        assert_eq!(request.args.len(), 2);
        assert_eq!(request.abi["name"], "foo");
    }
}
