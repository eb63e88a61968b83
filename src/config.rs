// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the application. Configuration is loaded from the environment
//! at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `VAULT_KEY` | Comma-separated vault secrets | Required |
//! | `VAULT_AUTH_SECRET_KEY` | Secondary HMAC key for privileged endpoints | Optional |
//! | `VAULT_STORAGE_BACKEND` | Storage backend (`memory` or `redb`) | Required |
//! | `VAULT_REDB_PATH` | Database file for the `redb` backend | `vault.redb` |
//! | `VAULT_ANONYMIZATION_KEY` | Keystream key for identifier obfuscation | Required |
//! | `API_URL` | Upstream KMS base URL | `https://signchain.net` |
//! | `VAULT_INSECURE_HTTP` | Listen plain HTTP when `true` | `false` |
//! | `PORT` | Server bind port | `8443` |
//! | `ENV` | Deployment environment name | `development` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::path::PathBuf;

/// Environment variable holding the comma-separated vault key secrets.
pub const VAULT_KEY_ENV: &str = "VAULT_KEY";

/// Environment variable holding the optional auth secret key.
pub const VAULT_AUTH_SECRET_KEY_ENV: &str = "VAULT_AUTH_SECRET_KEY";

/// Environment variable selecting the storage backend.
pub const VAULT_STORAGE_BACKEND_ENV: &str = "VAULT_STORAGE_BACKEND";

/// Environment variable pointing at the redb database file.
pub const VAULT_REDB_PATH_ENV: &str = "VAULT_REDB_PATH";

/// Environment variable holding the identifier anonymization key.
pub const VAULT_ANONYMIZATION_KEY_ENV: &str = "VAULT_ANONYMIZATION_KEY";

/// Environment variable for the upstream KMS base URL.
pub const API_URL_ENV: &str = "API_URL";

/// Environment variable acknowledging plain-HTTP operation.
pub const VAULT_INSECURE_HTTP_ENV: &str = "VAULT_INSECURE_HTTP";

/// Environment variable for the bind port.
pub const PORT_ENV: &str = "PORT";

/// Environment variable naming the deployment environment.
pub const ENV_ENV: &str = "ENV";

/// Default upstream KMS base URL.
pub const DEFAULT_API_URL: &str = "https://signchain.net";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8443;

/// The anonymization key shipped by earlier releases. Deployments must
/// override it; startup fails when this value is detected.
pub const LEGACY_ANONYMIZATION_KEY: &str = "ee63fc6f6f1e362f6f6a05977034ac9648cd9fde";

/// Configured storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    /// In-process store, for development and tests.
    Memory,
    /// Embedded ACID store backed by a redb database file.
    Redb,
}

impl std::str::FromStr for StorageBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "redb" => Ok(Self::Redb),
            other => Err(ConfigError::InvalidBackend(other.to_string())),
        }
    }
}

/// Configuration load errors, reported once at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no {VAULT_KEY_ENV} configured, please follow online documentation")]
    MissingVaultKey,

    #[error("storage backend not configured, set {VAULT_STORAGE_BACKEND_ENV} to `memory` or `redb`")]
    MissingBackend,

    #[error("invalid storage backend: {0}, set {VAULT_STORAGE_BACKEND_ENV} to `memory` or `redb`")]
    InvalidBackend(String),

    #[error("{VAULT_ANONYMIZATION_KEY_ENV} is not configured; set a deployment-specific value")]
    MissingAnonymizationKey,

    #[error("{VAULT_ANONYMIZATION_KEY_ENV} is set to the well-known default; set a deployment-specific value")]
    DefaultAnonymizationKey,

    #[error("invalid {PORT_ENV}: {0}")]
    InvalidPort(String),
}

/// Runtime configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered vault key secrets; the head signs outbound requests.
    pub vault_keys: Vec<String>,
    /// Optional secondary HMAC secret for privileged endpoints.
    pub auth_secret_key: Option<String>,
    /// Selected storage backend.
    pub storage_backend: StorageBackendKind,
    /// Database file for the redb backend.
    pub redb_path: PathBuf,
    /// Keystream key for identifier obfuscation.
    pub anonymization_key: Vec<u8>,
    /// Upstream KMS base URL.
    pub api_url: String,
    /// Whether plain-HTTP operation was acknowledged.
    pub insecure_http: bool,
    /// Bind port.
    pub port: u16,
    /// Deployment environment name.
    pub environment: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vault_keys: Vec<String> = env::var(VAULT_KEY_ENV)
            .unwrap_or_default()
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if vault_keys.is_empty() {
            return Err(ConfigError::MissingVaultKey);
        }

        let auth_secret_key = env::var(VAULT_AUTH_SECRET_KEY_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let storage_backend = env::var(VAULT_STORAGE_BACKEND_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingBackend)?
            .parse::<StorageBackendKind>()?;

        let redb_path = env::var(VAULT_REDB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("vault.redb"));

        let anonymization_key = env::var(VAULT_ANONYMIZATION_KEY_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingAnonymizationKey)?;
        if anonymization_key == LEGACY_ANONYMIZATION_KEY {
            return Err(ConfigError::DefaultAnonymizationKey);
        }

        let api_url = env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let insecure_http = env::var(VAULT_INSECURE_HTTP_ENV)
            .map(|v| v == "true")
            .unwrap_or(false);

        let port = match env::var(PORT_ENV) {
            Ok(p) => p.parse::<u16>().map_err(|_| ConfigError::InvalidPort(p))?,
            Err(_) => DEFAULT_PORT,
        };

        let environment = env::var(ENV_ENV).unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            vault_keys,
            auth_secret_key,
            storage_backend,
            redb_path,
            anonymization_key: anonymization_key.into_bytes(),
            api_url,
            insecure_http,
            port,
            environment,
        })
    }
}
