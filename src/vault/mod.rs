// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Vault Core
//!
//! Envelope-encryption lifecycle for custodied wallets.
//!
//! ## Key Hierarchy
//!
//! ```text
//! KMS wrapping key (remote, opaque handle)
//!   └── DEK - 32-byte AES-256 key, stored only as KMS ciphertext,
//!       shared by up to 1000 wallets
//!         └── wallet private key - secp256k1 scalar, stored as
//!             AES-256-GCM ciphertext under the DEK
//! ```
//!
//! Plaintext DEKs exist only transiently inside a request, in zeroizing
//! buffers. Creating a wallet never requires the KMS `encrypt` call unless
//! every candidate DEK is saturated; recovering a private key always
//! requires exactly one KMS `decrypt` call.

pub mod aes;

use std::sync::{Arc, OnceLock};

use alloy::primitives::{keccak256, Address};
use async_trait::async_trait;
use chrono::Duration;
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::ApiError;
use crate::kms::KmsClient;
use crate::storage::{DekProvisioner, DekRecord, ListPage, StorageBackend, WalletRecord};

/// A DEK stops accepting new wallets once this many allocations reference it.
pub const MAX_DEK_REF_COUNT: u64 = 1000;

/// The envelope-encryption service.
///
/// The storage backend is attached after construction because backends need
/// the vault as their DEK provisioner; the wiring order mirrors startup:
/// auth → vault → storage → attach.
pub struct Vault {
    kms: KmsClient,
    storage: OnceLock<Arc<dyn StorageBackend>>,
}

impl Vault {
    pub fn new(kms: KmsClient) -> Self {
        Self {
            kms,
            storage: OnceLock::new(),
        }
    }

    /// Attach the storage backend. Fails if one is already attached.
    pub fn set_storage_backend(&self, storage: Arc<dyn StorageBackend>) -> Result<(), ApiError> {
        self.storage
            .set(storage)
            .map_err(|_| ApiError::internal("storage backend already set"))
    }

    fn storage(&self) -> Result<&Arc<dyn StorageBackend>, ApiError> {
        self.storage
            .get()
            .ok_or_else(|| ApiError::internal("storage backend not configured"))
    }

    /// Create a wallet: generate a keypair, seal the private scalar under a
    /// shared DEK, persist the row.
    pub async fn create_wallet(&self, account: &str, name: &str) -> Result<WalletRecord, ApiError> {
        let signing_key = generate_signing_key();
        let address = wallet_address(signing_key.verifying_key());

        let dek = self
            .storage()?
            .get_or_create_random_key(MAX_DEK_REF_COUNT)
            .await?;
        let dek_plain = self.unwrap_dek(&dek).await?;

        let private_bytes = Zeroizing::new(signing_key.to_bytes().to_vec());
        let sealed = aes::seal(&dek_plain, &private_bytes)?;

        self.storage()?
            .create_wallet(account, name, address, &dek.id, &sealed)
            .await
    }

    /// Fetch a wallet row by account and address.
    pub async fn get_wallet(&self, account: &str, address: Address) -> Result<WalletRecord, ApiError> {
        self.storage()?.get_wallet(account, address).await
    }

    /// List an account's wallets.
    pub async fn list_wallets(
        &self,
        account: &str,
        offset: u64,
        limit: u64,
    ) -> Result<ListPage<WalletRecord>, ApiError> {
        self.storage()?.list_wallets(account, offset, limit).await
    }

    /// Rename a wallet.
    pub async fn update_wallet(
        &self,
        account: &str,
        address: Address,
        name: &str,
    ) -> Result<WalletRecord, ApiError> {
        self.storage()?.update_wallet(account, address, name).await
    }

    /// Schedule a wallet for deletion after `ttl`.
    pub async fn expire_wallet(
        &self,
        account: &str,
        address: Address,
        ttl: Duration,
    ) -> Result<WalletRecord, ApiError> {
        self.storage()?.expire_wallet(account, address, ttl).await
    }

    /// Clear a wallet's scheduled deletion.
    pub async fn unexpire_wallet(
        &self,
        account: &str,
        address: Address,
    ) -> Result<WalletRecord, ApiError> {
        self.storage()?.unexpire_wallet(account, address).await
    }

    /// Recover a wallet's signing key: fetch its DEK, unwrap upstream,
    /// open the GCM seal, parse the scalar.
    ///
    /// The recovered key must regenerate the stored address; a mismatch
    /// means corrupted key material and is never signed with.
    pub async fn wallet_private_key(&self, wallet: &WalletRecord) -> Result<SigningKey, ApiError> {
        let dek = self
            .storage()?
            .get_data_encrypting_key(&wallet.data_encrypting_key)
            .await?;
        let dek_plain = self.unwrap_dek(&dek).await?;

        let private_bytes = aes::open(&dek_plain, &wallet.encrypted_private_key)?;
        let signing_key = SigningKey::from_slice(&private_bytes)
            .map_err(|_| ApiError::internal("stored private key is invalid"))?;

        if wallet_address(signing_key.verifying_key()) != wallet.address {
            return Err(ApiError::internal(
                "stored private key does not match wallet address",
            ));
        }
        Ok(signing_key)
    }

    /// Unwrap a DEK through the KMS and validate its shape.
    async fn unwrap_dek(&self, dek: &DekRecord) -> Result<Zeroizing<Vec<u8>>, ApiError> {
        let plain = self
            .kms
            .decrypt(&dek.key_encrypting_key, &dek.encrypted_key)
            .await?;
        if plain.len() != aes::KEY_LEN {
            return Err(ApiError::upstream("kms returned malformed key material"));
        }
        Ok(plain)
    }
}

#[async_trait]
impl DekProvisioner for Vault {
    /// Wrap 32 fresh random bytes upstream and persist the resulting DEK.
    async fn provision_data_encrypting_key(&self) -> Result<DekRecord, ApiError> {
        let mut data = Zeroizing::new([0u8; aes::KEY_LEN]);
        OsRng.fill_bytes(&mut data[..]);

        let wrapped = self.kms.encrypt(&data[..]).await?;
        self.storage()?
            .create_data_encrypting_key(&wrapped.key_encrypting_key, &wrapped.encrypted_data)
            .await
    }
}

/// Generate a secp256k1 signing key from OS randomness, rejecting scalars
/// outside the curve order.
pub fn generate_signing_key() -> SigningKey {
    loop {
        let mut candidate = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut candidate[..]);
        if let Ok(key) = SigningKey::from_slice(&candidate[..]) {
            return key;
        }
    }
}

/// Derive the Ethereum address: low 20 bytes of the Keccak-256 of the
/// uncompressed public key (sans the 0x04 tag byte).
pub fn wallet_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_valid_and_distinct() {
        let a = generate_signing_key();
        let b = generate_signing_key();
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn address_derivation_matches_known_vector() {
        // The classic test vector: private key 0x...01 owns
        // 0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf.
        let mut scalar = [0u8; 32];
        scalar[31] = 1;
        let key = SigningKey::from_slice(&scalar).unwrap();

        assert_eq!(
            wallet_address(key.verifying_key()),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn sealed_key_regenerates_address() {
        let signing_key = generate_signing_key();
        let address = wallet_address(signing_key.verifying_key());

        let mut dek = [0u8; aes::KEY_LEN];
        OsRng.fill_bytes(&mut dek);

        let sealed = aes::seal(&dek, signing_key.to_bytes().as_slice()).unwrap();
        let opened = aes::open(&dek, &sealed).unwrap();
        assert_eq!(opened.len(), 32);

        let recovered = SigningKey::from_slice(&opened).unwrap();
        assert_eq!(wallet_address(recovered.verifying_key()), address);
    }
}
