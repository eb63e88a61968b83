// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Pluggable persistence for data encrypting keys and wallets.
//!
//! ## Contract
//!
//! [`StorageBackend`] is the single capability set every backend implements;
//! nothing backend-specific leaks above it. Backends guarantee:
//!
//! - a unique index on wallet address
//! - TTL enforcement on `expires` for both wallets and DEKs (sweep interval
//!   ≤ 60 s, plus read-side filtering)
//! - atomic DEK allocation: [`StorageBackend::get_or_create_random_key`]
//!   never hands out a key whose allocation count has reached the ceiling,
//!   even under concurrent wallet creation
//!
//! ## DEK Provisioning
//!
//! When no candidate DEK qualifies, the backend synthesizes one through the
//! [`DekProvisioner`] capability (implemented by the vault core, which calls
//! the remote KMS). The backend is handed the provisioner at construction,
//! mirroring the service wiring order: auth → vault → storage → backend
//! attach.

pub mod anonymize;
pub mod memory;
pub mod redb;

use std::sync::Arc;

use ::chrono::{DateTime, Duration, Utc};
use alloy::primitives::Address;
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::{Config, StorageBackendKind};
use crate::error::ApiError;

pub use self::memory::MemoryBackend;
pub use self::redb::RedbBackend;

/// Internal 12-byte object identifier.
pub type ObjectId = [u8; 12];

/// Mint a new object id: 4-byte big-endian Unix seconds followed by 8
/// random bytes.
pub fn new_object_id() -> ObjectId {
    let mut id = [0u8; 12];
    let seconds = Utc::now().timestamp().max(0) as u32;
    id[..4].copy_from_slice(&seconds.to_be_bytes());
    OsRng.fill_bytes(&mut id[4..]);
    id
}

/// Interval between TTL sweeps.
pub(crate) const SWEEP_INTERVAL_SECS: u64 = 30;

/// A stored data encrypting key wrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DekRecord {
    /// Internal identifier.
    pub id: ObjectId,
    /// Opaque KMS handle naming the wrapping key.
    pub key_encrypting_key: String,
    /// Ciphertext of the 32-byte AES key.
    pub encrypted_key: Vec<u8>,
    /// Expiry instant, when scheduled for deletion.
    pub expires: Option<DateTime<Utc>>,
}

/// A stored wallet row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Internal identifier.
    pub id: ObjectId,
    /// Owning account.
    pub account: String,
    /// Human-readable name.
    pub name: String,
    /// Ethereum address derived from the wallet's public key. Unique across
    /// all accounts.
    pub address: Address,
    /// Identifier of the DEK sealing the private key.
    pub data_encrypting_key: ObjectId,
    /// AES-256-GCM ciphertext of the private scalar, nonce prepended.
    pub encrypted_private_key: Vec<u8>,
    /// Creation instant.
    pub created: DateTime<Utc>,
    /// Last mutation instant.
    pub updated: DateTime<Utc>,
    /// Expiry instant, when scheduled for deletion.
    pub expires: Option<DateTime<Utc>>,
}

/// One page of a listing plus the total matching count.
#[derive(Debug, Clone)]
pub struct ListPage<T> {
    /// Total rows matching the filter.
    pub count: u64,
    /// The requested slice. A limit of zero yields an empty page while
    /// `count` stays populated.
    pub page: Vec<T>,
}

/// Capability to synthesize a fresh DEK through the remote KMS. Implemented
/// by the vault core.
#[async_trait]
pub trait DekProvisioner: Send + Sync {
    /// Wrap 32 fresh random bytes upstream and persist the result.
    async fn provision_data_encrypting_key(&self) -> Result<DekRecord, ApiError>;
}

/// The capability set every storage backend implements.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist a new DEK wrap.
    async fn create_data_encrypting_key(
        &self,
        key_encrypting_key: &str,
        encrypted_key: &[u8],
    ) -> Result<DekRecord, ApiError>;

    /// Fetch a DEK by id. Expired rows read as missing.
    async fn get_data_encrypting_key(&self, id: &ObjectId) -> Result<DekRecord, ApiError>;

    /// List DEKs with offset/limit pagination.
    async fn list_data_encrypting_keys(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<ListPage<DekRecord>, ApiError>;

    /// Schedule a DEK for deletion after `ttl`.
    async fn expire_data_encrypting_key(
        &self,
        id: &ObjectId,
        ttl: Duration,
    ) -> Result<DekRecord, ApiError>;

    /// Clear a DEK's scheduled deletion.
    async fn unexpire_data_encrypting_key(&self, id: &ObjectId) -> Result<DekRecord, ApiError>;

    /// Number of wallet allocations referencing the DEK.
    async fn data_encrypting_key_ref_count(&self, id: &ObjectId) -> Result<u64, ApiError>;

    /// Atomically sample a live DEK whose allocation count is below
    /// `max_ref_count`, reserving one slot; synthesize a fresh DEK through
    /// the provisioner when no candidate qualifies.
    async fn get_or_create_random_key(&self, max_ref_count: u64) -> Result<DekRecord, ApiError>;

    /// Persist a new wallet row. Fails if the address already exists.
    async fn create_wallet(
        &self,
        account: &str,
        name: &str,
        address: Address,
        data_encrypting_key: &ObjectId,
        encrypted_private_key: &[u8],
    ) -> Result<WalletRecord, ApiError>;

    /// Fetch a wallet by account and address. Expired rows read as missing.
    async fn get_wallet(&self, account: &str, address: Address) -> Result<WalletRecord, ApiError>;

    /// List an account's wallets with offset/limit pagination.
    async fn list_wallets(
        &self,
        account: &str,
        offset: u64,
        limit: u64,
    ) -> Result<ListPage<WalletRecord>, ApiError>;

    /// Rename a wallet, bumping `updated`.
    async fn update_wallet(
        &self,
        account: &str,
        address: Address,
        name: &str,
    ) -> Result<WalletRecord, ApiError>;

    /// Schedule a wallet for deletion after `ttl`, bumping `updated`.
    async fn expire_wallet(
        &self,
        account: &str,
        address: Address,
        ttl: Duration,
    ) -> Result<WalletRecord, ApiError>;

    /// Clear a wallet's scheduled deletion, bumping `updated`.
    async fn unexpire_wallet(
        &self,
        account: &str,
        address: Address,
    ) -> Result<WalletRecord, ApiError>;
}

/// Whether a row with the given expiry should be treated as deleted.
pub(crate) fn is_expired(expires: &Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires.map(|at| at <= now).unwrap_or(false)
}

/// `NotFound` error for a wallet lookup.
pub(crate) fn wallet_not_found(account: &str, address: Address) -> ApiError {
    ApiError::not_found(format!(
        "wallet {} not found for account {account}",
        address.to_checksum(None)
    ))
}

/// `NotFound` error for a DEK lookup.
pub(crate) fn dek_not_found() -> ApiError {
    ApiError::not_found("data encrypting key not found")
}

/// Construct the backend selected by configuration.
pub fn connect(
    config: &Config,
    provisioner: Arc<dyn DekProvisioner>,
) -> Result<Arc<dyn StorageBackend>, ApiError> {
    match config.storage_backend {
        StorageBackendKind::Memory => Ok(Arc::new(MemoryBackend::new(provisioner))),
        StorageBackendKind::Redb => Ok(Arc::new(RedbBackend::open(
            &config.redb_path,
            provisioner,
        )?)),
    }
}
