// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::sync::Arc;

use relational_vault::api;
use relational_vault::auth::Authenticator;
use relational_vault::config::Config;
use relational_vault::kms::KmsClient;
use relational_vault::signer::Signer;
use relational_vault::state::AppState;
use relational_vault::storage::{self, anonymize::IdCodec};
use relational_vault::vault::Vault;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var("LOG_FORMAT").unwrap_or_default();

    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{err}");
            std::process::exit(1);
        }
    };

    // TLS is terminated in front of the service; plain-HTTP operation must
    // be acknowledged explicitly.
    if !config.insecure_http {
        tracing::error!(
            "refusing to serve plaintext: terminate TLS in front of the vault, or set VAULT_INSECURE_HTTP=true to acknowledge"
        );
        std::process::exit(1);
    }

    let auth = Arc::new(Authenticator::new(
        &config.vault_keys,
        config.auth_secret_key.clone(),
    ));
    let kms = KmsClient::new(auth.clone(), config.api_url.clone());
    let vault = Arc::new(Vault::new(kms));

    let backend = match storage::connect(&config, vault.clone()) {
        Ok(backend) => backend,
        Err(err) => {
            tracing::error!("failed to initialize storage: {err}");
            std::process::exit(1);
        }
    };
    if let Err(err) = vault.set_storage_backend(backend) {
        tracing::error!("{err}");
        std::process::exit(1);
    }

    let signer = Arc::new(Signer::new(vault.clone()));
    let id_codec = Arc::new(IdCodec::new(config.anonymization_key.clone()));

    let app = api::router(AppState::new(auth, vault, signer, id_codec));

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        port = config.port,
        "started relational vault"
    );

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("server failed: {err}");
        std::process::exit(1);
    }
}
