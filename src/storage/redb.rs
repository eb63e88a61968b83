// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded storage backend backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `deks`: id → serialized [`DekRecord`] (JSON bytes)
//! - `dek_refs`: id → allocation count
//! - `wallets`: id → serialized [`WalletRecord`] (JSON bytes)
//! - `wallet_by_address`: 20-byte address → 12-byte wallet id
//!
//! The address table doubles as the unique index on wallet addresses.
//! DEK sampling, the ceiling check, and the slot reservation all happen
//! inside one write transaction, which is what makes
//! [`StorageBackend::get_or_create_random_key`] safe under concurrent
//! wallet creation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use ::redb::{Database, ReadableTable, TableDefinition};
use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::error::ApiError;

use super::{
    dek_not_found, is_expired, new_object_id, wallet_not_found, DekProvisioner, DekRecord,
    ListPage, ObjectId, StorageBackend, WalletRecord, SWEEP_INTERVAL_SECS,
};

/// Primary DEK table: id → JSON record.
const DEKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("deks");

/// DEK allocation counters: id → count.
const DEK_REFS: TableDefinition<&[u8], u64> = TableDefinition::new("dek_refs");

/// Primary wallet table: id → JSON record.
const WALLETS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("wallets");

/// Unique index: 20-byte address → wallet id.
const WALLET_BY_ADDRESS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("wallet_by_address");

#[derive(Debug, thiserror::Error)]
enum StoreError {
    #[error("redb database error: {0}")]
    Database(#[from] ::redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] ::redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] ::redb::TableError),

    #[error("redb storage error: {0}")]
    Storage(#[from] ::redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] ::redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::internal(format!("storage failure: {err}"))
    }
}

/// Embedded ACID storage backend.
pub struct RedbBackend {
    db: Arc<Database>,
    provisioner: Arc<dyn DekProvisioner>,
}

impl RedbBackend {
    /// Open (or create) the database at the given path and start the TTL
    /// sweep task.
    pub fn open(path: &Path, provisioner: Arc<dyn DekProvisioner>) -> Result<Self, ApiError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path).map_err(StoreError::Database)?;
        let db = Arc::new(db);

        // Pre-create all tables so later read transactions don't fail.
        (|| -> Result<(), StoreError> {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(DEKS)?;
                let _ = write_txn.open_table(DEK_REFS)?;
                let _ = write_txn.open_table(WALLETS)?;
                let _ = write_txn.open_table(WALLET_BY_ADDRESS)?;
            }
            write_txn.commit()?;
            Ok(())
        })()?;

        let weak = Arc::downgrade(&db);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(StdDuration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                let Some(db) = weak.upgrade() else { break };
                if let Err(err) = sweep(&db, Utc::now()) {
                    tracing::warn!(error = %err, "storage sweep failed");
                }
            }
        });

        Ok(Self { db, provisioner })
    }
}

/// Remove rows past their expiry; release DEK allocation slots held by
/// removed wallets.
fn sweep(db: &Database, now: DateTime<Utc>) -> Result<(), StoreError> {
    let write_txn = db.begin_write()?;
    {
        let mut wallets = write_txn.open_table(WALLETS)?;
        let mut by_address = write_txn.open_table(WALLET_BY_ADDRESS)?;
        let mut dek_refs = write_txn.open_table(DEK_REFS)?;

        let mut expired: Vec<WalletRecord> = Vec::new();
        for row in wallets.iter()? {
            let (_, value) = row?;
            let record: WalletRecord = serde_json::from_slice(value.value())?;
            if is_expired(&record.expires, now) {
                expired.push(record);
            }
        }
        for record in expired {
            wallets.remove(record.id.as_slice())?;
            // A newer wallet may have displaced this row's address entry.
            let indexed = by_address
                .get(record.address.as_slice())?
                .map(|v| v.value().to_vec());
            if indexed.as_deref() == Some(record.id.as_slice()) {
                by_address.remove(record.address.as_slice())?;
            }
            let refs = dek_refs
                .get(record.data_encrypting_key.as_slice())?
                .map(|v| v.value())
                .unwrap_or(0);
            dek_refs.insert(
                record.data_encrypting_key.as_slice(),
                refs.saturating_sub(1),
            )?;
        }

        let mut deks = write_txn.open_table(DEKS)?;
        let mut expired_deks: Vec<ObjectId> = Vec::new();
        for row in deks.iter()? {
            let (_, value) = row?;
            let record: DekRecord = serde_json::from_slice(value.value())?;
            if is_expired(&record.expires, now) {
                expired_deks.push(record.id);
            }
        }
        for id in expired_deks {
            deks.remove(id.as_slice())?;
            dek_refs.remove(id.as_slice())?;
        }
    }
    write_txn.commit()?;
    Ok(())
}

impl RedbBackend {
    fn read_dek(&self, id: &ObjectId) -> Result<Option<DekRecord>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEKS)?;
        match table.get(id.as_slice())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write a DEK row inside one transaction.
    fn mutate_dek(
        &self,
        id: &ObjectId,
        mutate: impl FnOnce(&mut DekRecord),
    ) -> Result<Option<DekRecord>, StoreError> {
        let now = Utc::now();
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(DEKS)?;
            let existing = match table.get(id.as_slice())? {
                Some(value) => {
                    let record: DekRecord = serde_json::from_slice(value.value())?;
                    (!is_expired(&record.expires, now)).then_some(record)
                }
                None => None,
            };
            match existing {
                Some(mut record) => {
                    mutate(&mut record);
                    table.insert(id.as_slice(), serde_json::to_vec(&record)?.as_slice())?;
                    Some(record)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Read-modify-write a wallet row inside one transaction, scoped to the
    /// owning account.
    fn mutate_wallet(
        &self,
        account: &str,
        address: Address,
        mutate: impl FnOnce(&mut WalletRecord, DateTime<Utc>),
    ) -> Result<Option<WalletRecord>, StoreError> {
        let now = Utc::now();
        let write_txn = self.db.begin_write()?;
        let updated = {
            let by_address = write_txn.open_table(WALLET_BY_ADDRESS)?;
            let id: Option<ObjectId> = by_address
                .get(address.as_slice())?
                .and_then(|v| v.value().try_into().ok());
            drop(by_address);

            let mut wallets = write_txn.open_table(WALLETS)?;
            let existing = match id {
                Some(id) => match wallets.get(id.as_slice())? {
                    Some(value) => {
                        let record: WalletRecord = serde_json::from_slice(value.value())?;
                        (record.account == account && !is_expired(&record.expires, now))
                            .then_some(record)
                    }
                    None => None,
                },
                None => None,
            };
            match existing {
                Some(mut record) => {
                    mutate(&mut record, now);
                    record.updated = now;
                    wallets.insert(
                        record.id.as_slice(),
                        serde_json::to_vec(&record)?.as_slice(),
                    )?;
                    Some(record)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }
}

#[async_trait]
impl StorageBackend for RedbBackend {
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

        let result: Result<(), StoreError> = (|| {
            let write_txn = self.db.begin_write()?;
            {
                let mut deks = write_txn.open_table(DEKS)?;
                deks.insert(
                    record.id.as_slice(),
                    serde_json::to_vec(&record)?.as_slice(),
                )?;
                let mut dek_refs = write_txn.open_table(DEK_REFS)?;
                dek_refs.insert(record.id.as_slice(), 0u64)?;
            }
            write_txn.commit()?;
            Ok(())
        })();
        result?;
        Ok(record)
    }

    async fn get_data_encrypting_key(&self, id: &ObjectId) -> Result<DekRecord, ApiError> {
        let record = self.read_dek(id)?;
        record
            .filter(|k| !is_expired(&k.expires, Utc::now()))
            .ok_or_else(dek_not_found)
    }

    async fn list_data_encrypting_keys(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<ListPage<DekRecord>, ApiError> {
        let now = Utc::now();
        let rows: Result<Vec<DekRecord>, StoreError> = (|| {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(DEKS)?;
            let mut rows = Vec::new();
            for row in table.iter()? {
                let (_, value) = row?;
                let record: DekRecord = serde_json::from_slice(value.value())?;
                if !is_expired(&record.expires, now) {
                    rows.push(record);
                }
            }
            Ok(rows)
        })();
        let rows = rows?;

        let count = rows.len() as u64;
        let page = rows
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
        let expires = Utc::now() + ttl;
        self.mutate_dek(id, |record| record.expires = Some(expires))?
            .ok_or_else(dek_not_found)
    }

    async fn unexpire_data_encrypting_key(&self, id: &ObjectId) -> Result<DekRecord, ApiError> {
        self.mutate_dek(id, |record| record.expires = None)?
            .ok_or_else(dek_not_found)
    }

    async fn data_encrypting_key_ref_count(&self, id: &ObjectId) -> Result<u64, ApiError> {
        let refs: Result<u64, StoreError> = (|| {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(DEK_REFS)?;
            Ok(table.get(id.as_slice())?.map(|v| v.value()).unwrap_or(0))
        })();
        Ok(refs?)
    }

    async fn get_or_create_random_key(&self, max_ref_count: u64) -> Result<DekRecord, ApiError> {
        loop {
            let now = Utc::now();

            // Sample, check the ceiling, and reserve the slot inside a
            // single write transaction.
            let sampled: Result<Option<DekRecord>, StoreError> = (|| {
                let write_txn = self.db.begin_write()?;
                let picked = {
                    let deks = write_txn.open_table(DEKS)?;
                    let mut dek_refs = write_txn.open_table(DEK_REFS)?;

                    let mut candidates: Vec<DekRecord> = Vec::new();
                    for row in deks.iter()? {
                        let (_, value) = row?;
                        let record: DekRecord = serde_json::from_slice(value.value())?;
                        if is_expired(&record.expires, now) {
                            continue;
                        }
                        let refs = dek_refs
                            .get(record.id.as_slice())?
                            .map(|v| v.value())
                            .unwrap_or(0);
                        if refs < max_ref_count {
                            candidates.push(record);
                        }
                    }

                    if candidates.is_empty() {
                        None
                    } else {
                        let picked = candidates
                            .swap_remove(rand::thread_rng().gen_range(0..candidates.len()));
                        let refs = dek_refs
                            .get(picked.id.as_slice())?
                            .map(|v| v.value())
                            .unwrap_or(0);
                        dek_refs.insert(picked.id.as_slice(), refs + 1)?;
                        Some(picked)
                    }
                };
                write_txn.commit()?;
                Ok(picked)
            })();

            if let Some(record) = sampled? {
                return Ok(record);
            }

            // No candidate: synthesize a fresh DEK upstream, then reserve
            // its first slot. Concurrent creators may saturate even a fresh
            // key before the reservation lands; resample rather than exceed
            // the ceiling.
            let record = self.provisioner.provision_data_encrypting_key().await?;
            let reserved: Result<bool, StoreError> = (|| {
                let write_txn = self.db.begin_write()?;
                let reserved = {
                    let mut dek_refs = write_txn.open_table(DEK_REFS)?;
                    let refs = dek_refs
                        .get(record.id.as_slice())?
                        .map(|v| v.value())
                        .unwrap_or(0);
                    if refs < max_ref_count {
                        dek_refs.insert(record.id.as_slice(), refs + 1)?;
                        true
                    } else {
                        false
                    }
                };
                write_txn.commit()?;
                Ok(reserved)
            })();

            if reserved? {
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
        let now = Utc::now();
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

        let inserted: Result<bool, StoreError> = (|| {
            let write_txn = self.db.begin_write()?;
            let inserted = {
                let mut wallets = write_txn.open_table(WALLETS)?;
                let mut by_address = write_txn.open_table(WALLET_BY_ADDRESS)?;
                let mut dek_refs = write_txn.open_table(DEK_REFS)?;

                let existing: Option<WalletRecord> = match by_address.get(address.as_slice())? {
                    Some(id) => {
                        let id = id.value().to_vec();
                        match wallets.get(id.as_slice())? {
                            Some(value) => Some(serde_json::from_slice(value.value())?),
                            None => None,
                        }
                    }
                    None => None,
                };

                match existing {
                    Some(old) if !is_expired(&old.expires, now) => false,
                    existing => {
                        // An expired row awaiting the sweep may be displaced.
                        if let Some(old) = existing {
                            wallets.remove(old.id.as_slice())?;
                            let refs = dek_refs
                                .get(old.data_encrypting_key.as_slice())?
                                .map(|v| v.value())
                                .unwrap_or(0);
                            dek_refs.insert(
                                old.data_encrypting_key.as_slice(),
                                refs.saturating_sub(1),
                            )?;
                        }
                        wallets.insert(
                            record.id.as_slice(),
                            serde_json::to_vec(&record)?.as_slice(),
                        )?;
                        by_address.insert(address.as_slice(), record.id.as_slice())?;
                        true
                    }
                }
            };
            write_txn.commit()?;
            Ok(inserted)
        })();

        if inserted? {
            Ok(record)
        } else {
            Err(ApiError::conflict(format!(
                "wallet address {} already exists",
                address.to_checksum(None)
            )))
        }
    }

    async fn get_wallet(&self, account: &str, address: Address) -> Result<WalletRecord, ApiError> {
        let now = Utc::now();
        let found: Result<Option<WalletRecord>, StoreError> = (|| {
            let read_txn = self.db.begin_read()?;
            let by_address = read_txn.open_table(WALLET_BY_ADDRESS)?;
            let id = match by_address.get(address.as_slice())? {
                Some(id) => id.value().to_vec(),
                None => return Ok(None),
            };
            let wallets = read_txn.open_table(WALLETS)?;
            match wallets.get(id.as_slice())? {
                Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
                None => Ok(None),
            }
        })();

        found?
            .filter(|w| w.account == account && !is_expired(&w.expires, now))
            .ok_or_else(|| wallet_not_found(account, address))
    }

    async fn list_wallets(
        &self,
        account: &str,
        offset: u64,
        limit: u64,
    ) -> Result<ListPage<WalletRecord>, ApiError> {
        let now = Utc::now();
        let rows: Result<Vec<WalletRecord>, StoreError> = (|| {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(WALLETS)?;
            let mut rows = Vec::new();
            for row in table.iter()? {
                let (_, value) = row?;
                let record: WalletRecord = serde_json::from_slice(value.value())?;
                if record.account == account && !is_expired(&record.expires, now) {
                    rows.push(record);
                }
            }
            Ok(rows)
        })();
        let rows = rows?;

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
        self.mutate_wallet(account, address, |record, _| {
            record.name = name.to_string();
        })?
        .ok_or_else(|| wallet_not_found(account, address))
    }

    async fn expire_wallet(
        &self,
        account: &str,
        address: Address,
        ttl: Duration,
    ) -> Result<WalletRecord, ApiError> {
        self.mutate_wallet(account, address, |record, now| {
            record.expires = Some(now + ttl);
        })?
        .ok_or_else(|| wallet_not_found(account, address))
    }

    async fn unexpire_wallet(
        &self,
        account: &str,
        address: Address,
    ) -> Result<WalletRecord, ApiError> {
        self.mutate_wallet(account, address, |record, _| {
            record.expires = None;
        })?
        .ok_or_else(|| wallet_not_found(account, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    struct FakeProvisioner {
        backend: tokio::sync::OnceCell<Arc<RedbBackend>>,
    }

    impl FakeProvisioner {
        fn wire(dir: &Path) -> (Arc<Self>, Arc<RedbBackend>) {
            let provisioner = Arc::new(Self {
                backend: tokio::sync::OnceCell::new(),
            });
            let backend = Arc::new(
                RedbBackend::open(&dir.join("vault.redb"), provisioner.clone()).unwrap(),
            );
            provisioner.backend.set(backend.clone()).ok();
            (provisioner, backend)
        }
    }

    #[async_trait]
    impl DekProvisioner for FakeProvisioner {
        async fn provision_data_encrypting_key(&self) -> Result<DekRecord, ApiError> {
            self.backend
                .get()
                .expect("wired")
                .create_data_encrypting_key("kek-fake", &[0xAA; 48])
                .await
        }
    }

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "vault-redb-test-{}-{:x}",
            std::process::id(),
            rand::thread_rng().gen::<u64>()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn addr(n: u8) -> Address {
        Address::from_slice(&[n; 20])
    }

    #[tokio::test]
    async fn wallet_crud_survives_reads() {
        let dir = temp_dir();
        let (_p, backend) = FakeProvisioner::wire(&dir);
        let dek = backend.get_or_create_random_key(1000).await.unwrap();

        let created = backend
            .create_wallet("acct-1", "ops", addr(1), &dek.id, b"sealed")
            .await
            .unwrap();

        let fetched = backend.get_wallet("acct-1", addr(1)).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.encrypted_private_key, b"sealed");

        let renamed = backend
            .update_wallet("acct-1", addr(1), "treasury")
            .await
            .unwrap();
        assert_eq!(renamed.name, "treasury");

        let err = backend.get_wallet("acct-2", addr(1)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn address_unique_index_holds() {
        let dir = temp_dir();
        let (_p, backend) = FakeProvisioner::wire(&dir);
        let dek = backend.get_or_create_random_key(1000).await.unwrap();

        backend
            .create_wallet("acct-1", "a", addr(2), &dek.id, b"x")
            .await
            .unwrap();
        let err = backend
            .create_wallet("acct-2", "b", addr(2), &dek.id, b"y")
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn expire_then_fetch_is_not_found() {
        let dir = temp_dir();
        let (_p, backend) = FakeProvisioner::wire(&dir);
        let dek = backend.get_or_create_random_key(1000).await.unwrap();
        backend
            .create_wallet("acct-1", "w", addr(3), &dek.id, b"x")
            .await
            .unwrap();

        backend
            .expire_wallet("acct-1", addr(3), Duration::milliseconds(5))
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let err = backend.get_wallet("acct-1", addr(3)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        // The sweep reclaims the row and its allocation slot.
        sweep(&backend.db, Utc::now()).unwrap();
        assert_eq!(
            backend.data_encrypting_key_ref_count(&dek.id).await.unwrap(),
            0
        );

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn saturation_provisions_second_key() {
        let dir = temp_dir();
        let (_p, backend) = FakeProvisioner::wire(&dir);

        let mut first_ids = std::collections::HashSet::new();
        for _ in 0..2 {
            first_ids.insert(backend.get_or_create_random_key(2).await.unwrap().id);
        }
        assert_eq!(first_ids.len(), 1);

        let third = backend.get_or_create_random_key(2).await.unwrap();
        assert!(!first_ids.contains(&third.id));

        let listed = backend.list_data_encrypting_keys(0, 10).await.unwrap();
        assert_eq!(listed.count, 2);

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn dek_expiry_excludes_from_sampling() {
        let dir = temp_dir();
        let (_p, backend) = FakeProvisioner::wire(&dir);

        let dek = backend.get_or_create_random_key(1000).await.unwrap();
        backend
            .expire_data_encrypting_key(&dek.id, Duration::milliseconds(1))
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        // The expired key no longer qualifies; a fresh one is provisioned.
        let next = backend.get_or_create_random_key(1000).await.unwrap();
        assert_ne!(next.id, dek.id);

        std::fs::remove_dir_all(dir).ok();
    }
}
