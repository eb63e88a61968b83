// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # HTTP API
//!
//! Route table (prefix `/api/v1`, all responses enveloped):
//!
//! | Method | Path | Auth |
//! |---|---|---|
//! | POST | `/accounts/{account}/wallets` | vault key |
//! | GET  | `/accounts/{account}/wallets/{address}` | vault key |
//! | GET  | `/accounts/{account}/wallets` | vault key |
//! | PUT  | `/accounts/{account}/wallets/{address}` | vault key |
//! | POST | `/accounts/{account}/wallets/{address}/expire` | vault key |
//! | POST | `/accounts/{account}/wallets/{address}/unexpire` | vault key |
//! | POST | `/accounts/{account}/wallets/{address}/sign` | vault key + auth signature |
//! | GET  | `/accounts/{account}/status` | vault key |
//!
//! The OpenAPI document is served unauthenticated at
//! `/api-doc/openapi.json`.

pub mod sign;
pub mod status;
pub mod wallets;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::auth::middleware::{require_auth_signature, require_vault_key};
use crate::models::{WalletListView, WalletView};
use crate::signer::CallSignature;
use crate::state::AppState;

/// Build the Axum application with all routes and middleware.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/accounts/{account}/wallets",
            post(wallets::create_wallet).get(wallets::list_wallets),
        )
        .route(
            "/accounts/{account}/wallets/{address}",
            get(wallets::get_wallet).put(wallets::update_wallet),
        )
        .route(
            "/accounts/{account}/wallets/{address}/expire",
            post(wallets::expire_wallet),
        )
        .route(
            "/accounts/{account}/wallets/{address}/unexpire",
            post(wallets::unexpire_wallet),
        )
        .route(
            "/accounts/{account}/wallets/{address}/sign",
            post(sign::sign)
                .layer(from_fn_with_state(state.clone(), require_auth_signature)),
        )
        .route("/accounts/{account}/status", get(status::status))
        .layer(from_fn_with_state(state.clone(), require_vault_key));

    Router::new()
        .nest("/api/v1", protected)
        .route("/api-doc/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        wallets::create_wallet,
        wallets::list_wallets,
        wallets::get_wallet,
        wallets::update_wallet,
        wallets::expire_wallet,
        wallets::unexpire_wallet,
        sign::sign,
        status::status
    ),
    components(
        schemas(
            WalletView,
            WalletListView,
            wallets::CreateWalletRequest,
            wallets::UpdateWalletRequest,
            wallets::ExpireWalletRequest,
            sign::SignRequest,
            CallSignature,
            status::StatusResponse
        )
    ),
    tags(
        (name = "Wallets", description = "Wallet lifecycle management"),
        (name = "Signing", description = "Method-call signing"),
        (name = "Status", description = "Deployment summary")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use alloy::dyn_abi::DynSolValue;
    use alloy::primitives::{keccak256, Address, B256};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::routing::post as axum_post;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::auth::Authenticator;
    use crate::kms::KmsClient;
    use crate::signer::Signer;
    use crate::storage::anonymize::IdCodec;
    use crate::storage::MemoryBackend;
    use crate::vault::{wallet_address, Vault};

    const VAULT_SECRET: &str = "0123456789abcdef0123456789abcdef";

    /// Fake KMS: "wraps" key material by XOR with a fixed pad, reversibly.
    fn fake_kms_router() -> Router {
        fn xor(data: &[u8]) -> Vec<u8> {
            data.iter().map(|b| b ^ 0x5A).collect()
        }

        async fn encrypt(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
            let data = BASE64.decode(body["data"].as_str().unwrap()).unwrap();
            Json(json!({
                "success": true,
                "data": {
                    "keyEncryptingKey": "kek-test",
                    "encryptedData": BASE64.encode(xor(&data)),
                }
            }))
        }

        async fn decrypt(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
            let data = BASE64
                .decode(body["encryptedData"].as_str().unwrap())
                .unwrap();
            Json(json!({"success": true, "data": BASE64.encode(xor(&data))}))
        }

        Router::new()
            .route("/api/v1/vault/encrypt", axum_post(encrypt))
            .route("/api/v1/vault/decrypt", axum_post(decrypt))
    }

    async fn spawn_fake_kms() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, fake_kms_router()).await.ok();
        });
        format!("http://{addr}")
    }

    async fn test_state(auth_secret: Option<String>) -> AppState {
        let kms_url = spawn_fake_kms().await;
        let auth = Arc::new(Authenticator::new(&[VAULT_SECRET], auth_secret));
        let kms = KmsClient::new(auth.clone(), kms_url);
        let vault = Arc::new(Vault::new(kms));
        let backend = Arc::new(MemoryBackend::new(vault.clone()));
        vault.set_storage_backend(backend).unwrap();
        let signer = Arc::new(Signer::new(vault.clone()));
        let id_codec = Arc::new(IdCodec::new(b"router-test-key".to_vec()));
        AppState::new(auth, vault, signer, id_codec)
    }

    fn signed_request(
        state: &AppState,
        method: &str,
        uri: &str,
        body: &str,
    ) -> Request<Body> {
        let (key_hash, signature) = state.auth.sign_request(body.as_bytes()).unwrap();
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-vault-key-hash", key_hash)
            .header("x-vault-signature", signature)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_requests_are_rejected() {
        let state = test_state(None).await;
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/v1/accounts/acct-1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "unauthenticated");
    }

    #[tokio::test]
    async fn tampered_body_is_rejected() {
        let state = test_state(None).await;
        let app = router(state.clone());

        let (key_hash, signature) = state.auth.sign_request(b"{\"name\":\"ops\"}").unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/accounts/acct-1/wallets")
            .header("x-vault-key-hash", key_hash)
            .header("x-vault-signature", signature)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"evil"}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_reports_key_count_and_version() {
        let state = test_state(None).await;
        let app = router(state.clone());

        let response = app
            .oneshot(signed_request(
                &state,
                "GET",
                "/api/v1/accounts/acct-1/status",
                "",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["vaultKeys"], 1);
        assert_eq!(body["data"]["wallets"], 0);
        assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn wallet_lifecycle_over_http() {
        let state = test_state(None).await;
        let app = router(state.clone());

        // Create.
        let response = app
            .clone()
            .oneshot(signed_request(
                &state,
                "POST",
                "/api/v1/accounts/acct-1/wallets",
                r#"{"name":"ops"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["success"], true);
        let address = created["data"]["address"].as_str().unwrap().to_string();
        assert!(created["data"]["id"].as_str().unwrap().starts_with("wlt-"));
        // Sanitized view only.
        assert!(created["data"].get("encryptedPrivateKey").is_none());
        assert!(created["data"].get("dataEncryptingKey").is_none());

        // Fetch, with and without the 0x prefix.
        for addr in [address.clone(), address.trim_start_matches("0x").to_string()] {
            let response = app
                .clone()
                .oneshot(signed_request(
                    &state,
                    "GET",
                    &format!("/api/v1/accounts/acct-1/wallets/{addr}"),
                    "",
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        // Rename.
        let response = app
            .clone()
            .oneshot(signed_request(
                &state,
                "PUT",
                &format!("/api/v1/accounts/acct-1/wallets/{address}"),
                r#"{"name":"treasury"}"#,
            ))
            .await
            .unwrap();
        let renamed = body_json(response).await;
        assert_eq!(renamed["data"]["name"], "treasury");

        // List.
        let response = app
            .clone()
            .oneshot(signed_request(
                &state,
                "GET",
                "/api/v1/accounts/acct-1/wallets",
                "",
            ))
            .await
            .unwrap();
        let listed = body_json(response).await;
        assert_eq!(listed["data"]["count"], 1);

        // Unknown wallet is a 404 envelope.
        let response = app
            .clone()
            .oneshot(signed_request(
                &state,
                "GET",
                "/api/v1/accounts/acct-1/wallets/0x0000000000000000000000000000000000000001",
                "",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let missing = body_json(response).await;
        assert_eq!(missing["success"], false);
    }

    #[tokio::test]
    async fn sign_round_trip_recovers_wallet_address() {
        let state = test_state(None).await;
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(signed_request(
                &state,
                "POST",
                "/api/v1/accounts/acct-1/wallets",
                r#"{"name":"signer"}"#,
            ))
            .await
            .unwrap();
        let created = body_json(response).await;
        let address: Address = created["data"]["address"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();

        let uniq = format!("0x{}", "ab".repeat(32));
        let sender = "0x00000000000000000000000000000000000000aa";
        let body = json!({
            "sender": sender,
            "uniq": uniq,
            "abi": {
                "name": "foo",
                "type": "function",
                "inputs": [
                    {"name": "amount", "type": "uint256"},
                    {"name": "signature", "type": "bytes"}
                ]
            },
            "args": ["0x1", "0x"]
        })
        .to_string();

        let response = app
            .clone()
            .oneshot(signed_request(
                &state,
                "POST",
                &format!("/api/v1/accounts/acct-1/wallets/{address}/sign"),
                &body,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let signed = body_json(response).await;
        let result = signed["data"].as_array().unwrap();

        // Original arguments echoed, signature object appended.
        assert_eq!(result.len(), 3);
        assert_eq!(result[0], "0x1");
        assert_eq!(result[1], "0x");

        let sig = &result[2];
        let v = sig["v"].as_u64().unwrap() as u8;
        assert!(v == 27 || v == 28);
        let nonce = crate::signer::abi::decode_hex(sig["nonce"].as_str().unwrap()).unwrap();
        let r = crate::signer::abi::decode_hex(sig["r"].as_str().unwrap()).unwrap();
        let s = crate::signer::abi::decode_hex(sig["s"].as_str().unwrap()).unwrap();
        assert_eq!(nonce.len(), 32);
        assert_eq!(r.len(), 32);
        assert_eq!(s.len(), 32);

        // Recompute the signed hash and recover the public key.
        let params = DynSolValue::Tuple(vec![
            DynSolValue::FixedBytes(B256::right_padding_from(&keccak256(b"foo(uint256,bytes)")[..4]), 4),
            DynSolValue::Uint(alloy::primitives::U256::from(1u64), 256),
        ])
        .abi_encode_params();
        let payload = DynSolValue::Tuple(vec![
            DynSolValue::FixedBytes(B256::from([0xab; 32]), 32),
            DynSolValue::FixedBytes(B256::from_slice(&nonce), 32),
            DynSolValue::Address(sender.parse().unwrap()),
            DynSolValue::Bytes(params),
        ])
        .abi_encode_params();
        let hash = keccak256(&payload);

        let mut sig_bytes = [0u8; 64];
        sig_bytes[..32].copy_from_slice(&r);
        sig_bytes[32..].copy_from_slice(&s);
        let signature = Signature::from_slice(&sig_bytes).unwrap();
        let recovery_id = RecoveryId::from_byte(v - 27).unwrap();

        let recovered =
            VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id).unwrap();
        assert_eq!(wallet_address(&recovered), address);
    }

    #[tokio::test]
    async fn sign_requires_auth_signature_when_secret_configured() {
        let state = test_state(Some("s".repeat(32))).await;
        let app = router(state.clone());

        let body = r#"{"sender":"0x00000000000000000000000000000000000000aa","uniq":"0x00","abi":{"name":"foo","type":"function","inputs":[{"type":"bytes","name":"sig"}]},"args":[]}"#;

        // Vault-key signature alone is not enough.
        let response = app
            .clone()
            .oneshot(signed_request(
                &state,
                "POST",
                "/api/v1/accounts/acct-1/wallets/0x0000000000000000000000000000000000000001/sign",
                body,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Other endpoints stay vault-key-only.
        let response = app
            .oneshot(signed_request(
                &state,
                "GET",
                "/api/v1/accounts/acct-1/status",
                "",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let state = test_state(None).await;
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert!(body["paths"]
            .as_object()
            .unwrap()
            .contains_key("/api/v1/accounts/{account}/wallets/{address}/sign"));
    }
}
