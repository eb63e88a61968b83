// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process storage backend.
//!
//! Reference implementation of the storage contract, used by tests and
//! development deployments. All state lives behind a single mutex, which
//! makes the sample-and-reserve step of
//! [`StorageBackend::get_or_create_random_key`] trivially atomic.
//!
//! A background task sweeps expired rows on a fixed interval; reads
//! additionally filter expired rows so a row past its `expires` is never
//! observable, sweep lag notwithstanding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::error::ApiError;

use super::{
    dek_not_found, is_expired, new_object_id, wallet_not_found, DekProvisioner, DekRecord,
    ListPage, ObjectId, StorageBackend, WalletRecord, SWEEP_INTERVAL_SECS,
};

#[derive(Default)]
struct Inner {
    deks: HashMap<ObjectId, DekRecord>,
    wallets: HashMap<ObjectId, WalletRecord>,
    by_address: HashMap<Address, ObjectId>,
    dek_refs: HashMap<ObjectId, u64>,
}

impl Inner {
    fn live_wallet(&self, account: &str, address: Address, now: DateTime<Utc>) -> Option<&WalletRecord> {
        let id = self.by_address.get(&address)?;
        let wallet = self.wallets.get(id)?;
        if wallet.account != account || is_expired(&wallet.expires, now) {
            return None;
        }
        Some(wallet)
    }

    fn sweep(&mut self, now: DateTime<Utc>) {
        let expired_wallets: Vec<ObjectId> = self
            .wallets
            .values()
            .filter(|w| is_expired(&w.expires, now))
            .map(|w| w.id)
            .collect();
        for id in expired_wallets {
            if let Some(wallet) = self.wallets.remove(&id) {
                // A newer wallet may have displaced this row's address entry.
                if self.by_address.get(&wallet.address) == Some(&wallet.id) {
                    self.by_address.remove(&wallet.address);
                }
                if let Some(refs) = self.dek_refs.get_mut(&wallet.data_encrypting_key) {
                    *refs = refs.saturating_sub(1);
                }
            }
        }

        let expired_deks: Vec<ObjectId> = self
            .deks
            .values()
            .filter(|k| is_expired(&k.expires, now))
            .map(|k| k.id)
            .collect();
        for id in expired_deks {
            self.deks.remove(&id);
            self.dek_refs.remove(&id);
        }
    }
}

/// In-memory storage backend.
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    provisioner: Arc<dyn DekProvisioner>,
}

impl MemoryBackend {
    /// Create the backend and start its TTL sweep task.
    pub fn new(provisioner: Arc<dyn DekProvisioner>) -> Self {
        let inner = Arc::new(Mutex::new(Inner::default()));

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(StdDuration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if let Ok(mut inner) = inner.lock() {
                    inner.sweep(Utc::now());
                };
            }
        });

        Self { inner, provisioner }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, ApiError> {
        self.inner
            .lock()
            .map_err(|_| ApiError::internal("storage lock poisoned"))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_data_encrypting_key(
        &self,
        key_encrypting_key: &str,
        encrypted_key: &[u8],
    ) -> Result<DekRecord, ApiError> {
        let record = DekRecord {
            id: new_object_id(),
            key_encrypting_key: key_encrypting_key.to_string(),
            encrypted_key: encrypted_key.to_vec(),
            expires: None,
        };

        let mut inner = self.lock()?;
        inner.dek_refs.insert(record.id, 0);
        inner.deks.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_data_encrypting_key(&self, id: &ObjectId) -> Result<DekRecord, ApiError> {
        let inner = self.lock()?;
        inner
            .deks
            .get(id)
            .filter(|k| !is_expired(&k.expires, Utc::now()))
            .cloned()
            .ok_or_else(dek_not_found)
    }

    async fn list_data_encrypting_keys(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<ListPage<DekRecord>, ApiError> {
        let inner = self.lock()?;
        let now = Utc::now();
        let mut live: Vec<DekRecord> = inner
            .deks
            .values()
            .filter(|k| !is_expired(&k.expires, now))
            .cloned()
            .collect();
        live.sort_by_key(|k| k.id);

        let count = live.len() as u64;
        let page = live
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(ListPage { count, page })
    }

    async fn expire_data_encrypting_key(
        &self,
        id: &ObjectId,
        ttl: Duration,
    ) -> Result<DekRecord, ApiError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let record = inner
            .deks
            .get_mut(id)
            .filter(|k| !is_expired(&k.expires, now))
            .ok_or_else(dek_not_found)?;
        record.expires = Some(now + ttl);
        Ok(record.clone())
    }

    async fn unexpire_data_encrypting_key(&self, id: &ObjectId) -> Result<DekRecord, ApiError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let record = inner
            .deks
            .get_mut(id)
            .filter(|k| !is_expired(&k.expires, now))
            .ok_or_else(dek_not_found)?;
        record.expires = None;
        Ok(record.clone())
    }

    async fn data_encrypting_key_ref_count(&self, id: &ObjectId) -> Result<u64, ApiError> {
        let inner = self.lock()?;
        Ok(inner.dek_refs.get(id).copied().unwrap_or(0))
    }

    async fn get_or_create_random_key(&self, max_ref_count: u64) -> Result<DekRecord, ApiError> {
        loop {
            {
                let mut inner = self.lock()?;
                let now = Utc::now();
                let candidates: Vec<ObjectId> = inner
                    .deks
                    .values()
                    .filter(|k| !is_expired(&k.expires, now))
                    .filter(|k| inner.dek_refs.get(&k.id).copied().unwrap_or(0) < max_ref_count)
                    .map(|k| k.id)
                    .collect();

                if !candidates.is_empty() {
                    let picked = candidates[rand::thread_rng().gen_range(0..candidates.len())];
                    // Reserve the slot under the same lock that sampled it.
                    *inner.dek_refs.entry(picked).or_insert(0) += 1;
                    return Ok(inner.deks[&picked].clone());
                }
            }

            // Lock released: provisioning calls back into this backend.
            let record = self.provisioner.provision_data_encrypting_key().await?;
            let mut inner = self.lock()?;
            let refs = inner.dek_refs.entry(record.id).or_insert(0);
            // Concurrent creators may saturate even a fresh key before this
            // reservation lands; resample rather than exceed the ceiling.
            if *refs < max_ref_count {
                *refs += 1;
                return Ok(record);
            }
        }
    }

    async fn create_wallet(
        &self,
        account: &str,
        name: &str,
        address: Address,
        data_encrypting_key: &ObjectId,
        encrypted_private_key: &[u8],
    ) -> Result<WalletRecord, ApiError> {
        let mut inner = self.lock()?;
        let now = Utc::now();

        if let Some(id) = inner.by_address.get(&address) {
            if inner
                .wallets
                .get(id)
                .map(|w| !is_expired(&w.expires, now))
                .unwrap_or(false)
            {
                return Err(ApiError::conflict(format!(
                    "wallet address {} already exists",
                    address.to_checksum(None)
                )));
            }
        }

        let record = WalletRecord {
            id: new_object_id(),
            account: account.to_string(),
            name: name.to_string(),
            address,
            data_encrypting_key: *data_encrypting_key,
            encrypted_private_key: encrypted_private_key.to_vec(),
            created: now,
            updated: now,
            expires: None,
        };
        inner.by_address.insert(address, record.id);
        inner.wallets.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_wallet(&self, account: &str, address: Address) -> Result<WalletRecord, ApiError> {
        let inner = self.lock()?;
        inner
            .live_wallet(account, address, Utc::now())
            .cloned()
            .ok_or_else(|| wallet_not_found(account, address))
    }

    async fn list_wallets(
        &self,
        account: &str,
        offset: u64,
        limit: u64,
    ) -> Result<ListPage<WalletRecord>, ApiError> {
        let inner = self.lock()?;
        let now = Utc::now();
        let mut rows: Vec<WalletRecord> = inner
            .wallets
            .values()
            .filter(|w| w.account == account && !is_expired(&w.expires, now))
            .cloned()
            .collect();
        rows.sort_by_key(|w| w.id);

        let count = rows.len() as u64;
        let page = rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(ListPage { count, page })
    }

    async fn update_wallet(
        &self,
        account: &str,
        address: Address,
        name: &str,
    ) -> Result<WalletRecord, ApiError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let id = inner
            .live_wallet(account, address, now)
            .map(|w| w.id)
            .ok_or_else(|| wallet_not_found(account, address))?;

        let record = inner.wallets.get_mut(&id).expect("indexed wallet exists");
        record.name = name.to_string();
        record.updated = now;
        Ok(record.clone())
    }

    async fn expire_wallet(
        &self,
        account: &str,
        address: Address,
        ttl: Duration,
    ) -> Result<WalletRecord, ApiError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let id = inner
            .live_wallet(account, address, now)
            .map(|w| w.id)
            .ok_or_else(|| wallet_not_found(account, address))?;

        let record = inner.wallets.get_mut(&id).expect("indexed wallet exists");
        record.expires = Some(now + ttl);
        record.updated = now;
        Ok(record.clone())
    }

    async fn unexpire_wallet(
        &self,
        account: &str,
        address: Address,
    ) -> Result<WalletRecord, ApiError> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let id = inner
            .live_wallet(account, address, now)
            .map(|w| w.id)
            .ok_or_else(|| wallet_not_found(account, address))?;

        let record = inner.wallets.get_mut(&id).expect("indexed wallet exists");
        record.expires = None;
        record.updated = now;
        Ok(record.clone())
    }
}
