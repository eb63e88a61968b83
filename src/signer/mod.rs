// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Signer
//!
//! ABI-aware method-call signatures.
//!
//! ## Payload
//!
//! A sign request names a method (one JSON ABI fragment), its arguments, a
//! caller-chosen 32-byte `uniq` domain separator, the `sender` that will
//! submit the call on-chain, and the signing wallet. The signed hash binds
//! all of them:
//!
//! ```text
//! params  = abi_encode(bytes4 selector, args[..last])
//! payload = abi_encode(bytes32 uniq, bytes32 nonce, address sender, bytes params)
//! hash    = keccak256(payload)
//! ```
//!
//! The method's trailing input is the on-chain `bytes signature` slot the
//! produced signature will eventually fill, so it is excluded from the
//! packing; its type is validated rather than assumed.
//!
//! ## Key Cache
//!
//! Unwrapped signing keys are held in a bounded LRU keyed by
//! `(account, signer address)`. Eviction is purely size-driven. k256's
//! `SigningKey` zeroizes its scalar on drop, covering evicted entries
//! best-effort.

pub mod abi;

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use alloy::dyn_abi::DynSolValue;
use alloy::json_abi::JsonAbi;
use alloy::primitives::{keccak256, Address, B256};
use k256::ecdsa::SigningKey;
use lru::LruCache;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::vault::{wallet_address, Vault};

/// Capacity of the unwrapped-key cache.
pub const KEY_CACHE_CAPACITY: usize = 10 * 1024;

/// The signature object appended to the echoed argument list.
///
/// `v` is `recovery_id + 27` (pre-EIP-155); callers targeting EIP-155
/// chains adjust it themselves.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallSignature {
    /// 32-byte signing nonce, 0x-hex.
    pub nonce: String,
    /// Signature r, 0x-hex.
    pub r: String,
    /// Signature s (low-s form), 0x-hex.
    pub s: String,
    /// Recovery id + 27.
    pub v: u8,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    account: String,
    signer: Address,
}

/// Produces method-call signatures with vault-custodied keys.
pub struct Signer {
    vault: Arc<Vault>,
    cache: Mutex<LruCache<CacheKey, SigningKey>>,
}

impl Signer {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self {
            vault,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(KEY_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Sign a method call. Returns the original arguments with the
    /// [`CallSignature`] appended.
    pub async fn sign(
        &self,
        account: &str,
        sender: Address,
        uniq: &str,
        signer: Address,
        abi: &serde_json::Value,
        args: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        // Wrap the single fragment as a one-element document so the
        // standard ABI parser applies.
        let document: JsonAbi =
            serde_json::from_value(serde_json::Value::Array(vec![abi.clone()]))
                .map_err(|e| ApiError::bad_request(format!("invalid abi fragment: {e}")))?;
        let name = abi
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| ApiError::bad_request("abi fragment has no method name"))?;
        let function = document
            .function(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| ApiError::bad_request("abi fragment does not describe a function"))?;

        // The trailing input receives the signature on-chain and must be a
        // plain `bytes` slot.
        let last = function
            .inputs
            .last()
            .ok_or_else(|| ApiError::bad_request("abi method has no signature input"))?;
        if last.ty != "bytes" {
            return Err(ApiError::bad_request(
                "last abi input must be the bytes signature placeholder",
            ));
        }
        let packed_inputs = &function.inputs[..function.inputs.len() - 1];
        if args.len() < packed_inputs.len() {
            return Err(ApiError::bad_request(format!(
                "method takes {} arguments, got {}",
                packed_inputs.len(),
                args.len()
            )));
        }

        let mut head: Vec<DynSolValue> = Vec::with_capacity(packed_inputs.len() + 1);
        head.push(DynSolValue::FixedBytes(
            B256::right_padding_from(function.selector().as_slice()),
            4,
        ));
        for (param, raw) in packed_inputs.iter().zip(args) {
            head.push(abi::coerce_param(param, raw)?);
        }
        let encoded_params = DynSolValue::Tuple(head).abi_encode_params();

        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        let uniq = hex_to_fixed32(uniq)?;

        let payload = DynSolValue::Tuple(vec![
            DynSolValue::FixedBytes(uniq, 32),
            DynSolValue::FixedBytes(B256::from(nonce), 32),
            DynSolValue::Address(sender),
            DynSolValue::Bytes(encoded_params),
        ])
        .abi_encode_params();
        let hash = keccak256(&payload);

        let key = self.signer_key(account, signer).await?;
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|_| ApiError::internal("signing failed"))?;

        let call_signature = CallSignature {
            nonce: format!("0x{}", alloy::hex::encode(nonce)),
            r: format!("0x{}", alloy::hex::encode(signature.r().to_bytes())),
            s: format!("0x{}", alloy::hex::encode(signature.s().to_bytes())),
            v: recovery_id.to_byte() + 27,
        };

        let mut out = args.to_vec();
        out.push(
            serde_json::to_value(call_signature)
                .map_err(|e| ApiError::internal(format!("failed to encode signature: {e}")))?,
        );
        Ok(out)
    }

    /// Fetch the signing key for `(account, signer)`, through the cache.
    async fn signer_key(&self, account: &str, signer: Address) -> Result<SigningKey, ApiError> {
        let cache_key = CacheKey {
            account: account.to_string(),
            signer,
        };

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(key) = cache.get(&cache_key) {
                return Ok(key.clone());
            }
        }

        let wallet = self.vault.get_wallet(account, signer).await?;
        if wallet.address != signer {
            return Err(ApiError::bad_request(format!(
                "invalid signer: {}",
                signer.to_checksum(None)
            )));
        }
        let key = self.vault.wallet_private_key(&wallet).await?;
        debug_assert_eq!(wallet_address(key.verifying_key()), signer);

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(cache_key, key.clone());
        }
        Ok(key)
    }
}

/// Decode a hex string (optional `0x`) into a right-aligned 32-byte value:
/// shorter input is left-padded with zeros, longer input keeps its trailing
/// 32 bytes.
fn hex_to_fixed32(s: &str) -> Result<B256, ApiError> {
    let bytes = abi::decode_hex(s)?;
    let mut out = B256::ZERO;
    if bytes.len() >= 32 {
        out.copy_from_slice(&bytes[bytes.len() - 32..]);
    } else {
        out[32 - bytes.len()..].copy_from_slice(&bytes);
    }
    Ok(out)
}
